//! Scriptable in-memory serial device for tests.
//!
//! Lets tests feed bytes and I/O errors "from the board" and inspect what the
//! bridge wrote, without any hardware.  Clones share state, so a test keeps
//! one clone while the bridge owns another.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::SerialDevice;

/// One scripted result for a device read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRead {
    /// Bytes the board "sent".
    Data(Vec<u8>),
    /// An I/O error the driver "raised".
    Error(io::ErrorKind),
}

#[derive(Debug, Default)]
struct MockState {
    reads: VecDeque<MockRead>,
    written: Vec<u8>,
    write_error: Option<io::ErrorKind>,
    fail_clone: bool,
}

/// A fake serial device with shared, inspectable state.
#[derive(Debug, Clone, Default)]
pub struct MockSerialDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockSerialDevice {
    /// Creates an idle device with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes to be returned by a future read.
    pub fn push_bytes(&self, bytes: impl AsRef<[u8]>) {
        self.lock().reads.push_back(MockRead::Data(bytes.as_ref().to_vec()));
    }

    /// Queues an I/O error to be returned by a future read.
    pub fn push_error(&self, kind: io::ErrorKind) {
        self.lock().reads.push_back(MockRead::Error(kind));
    }

    /// Makes every subsequent write fail with `kind`.
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.lock().write_error = Some(kind);
    }

    /// Makes `try_clone_device` fail.
    pub fn fail_clone(&self) {
        self.lock().fail_clone = true;
    }

    /// Number of scripted reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.lock().reads.len()
    }

    /// Everything written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// [`MockSerialDevice::written`] decoded as (lossy) UTF-8.
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.lock().written).into_owned()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SerialDevice for MockSerialDevice {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        match state.reads.pop_front() {
            None => Ok(0),
            Some(MockRead::Error(kind)) => Err(io::Error::new(kind, "scripted serial error")),
            Some(MockRead::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    // Keep the remainder for the next read, like a driver buffer.
                    state.reads.push_front(MockRead::Data(bytes.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn write_all_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if let Some(kind) = state.write_error {
            return Err(io::Error::new(kind, "scripted write error"));
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn try_clone_device(&self) -> io::Result<Box<dyn SerialDevice>> {
        if self.lock().fail_clone {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "clone refused"));
        }
        Ok(Box::new(self.clone()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
