//! [`SerialDevice`] backed by a real OS serial port (`serialport` crate).
//!
//! Works with `/dev/ttyACM*` / `/dev/ttyUSB*` on Linux, `/dev/tty.*` on macOS
//! and `COM*` on Windows.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::SerialDevice;

/// An open OS serial port.
pub struct NativeSerialDevice {
    port: Box<dyn SerialPort>,
}

impl NativeSerialDevice {
    /// Opens `path` at `baud_rate`, 8N1, no flow control.
    ///
    /// # Errors
    ///
    /// Returns the driver error if the port does not exist, is already in
    /// use, or permission is denied.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> serialport::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()?;
        Ok(Self { port })
    }
}

impl SerialDevice for NativeSerialDevice {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            // The driver reports "no data within the timeout" as an error.
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            other => other,
        }
    }

    fn write_all_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn try_clone_device(&self) -> io::Result<Box<dyn SerialDevice>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(NativeSerialDevice { port }))
    }
}
