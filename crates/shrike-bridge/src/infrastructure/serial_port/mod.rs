//! Serial endpoint: the bridge's exclusive handle on the board.
//!
//! # Blocking driver, async caller
//!
//! The `serialport` crate exposes a blocking `std::io::Read`/`Write` API with
//! a per-port read timeout.  [`SerialEndpoint`] runs every device call on
//! Tokio's blocking thread pool (`spawn_blocking`) so the async runtime is
//! never stalled by the driver.
//!
//! # Two handles, two locks
//!
//! At construction the device handle is cloned once: one copy is used only
//! for reading, the other only for writing, each behind its own mutex.
//! A read that is waiting for the device timeout therefore never delays a
//! command from a client, while concurrent commands are still written one at
//! a time (no interleaved partial lines).
//!
//! # Testability
//!
//! The [`SerialDevice`] trait abstracts the OS port.  [`native`] wraps a real
//! `serialport` handle; [`mock`] provides a scriptable in-memory device.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::application::{SerialLink, WriteOutcome};
use crate::domain::BridgeError;

pub mod mock;
pub mod native;

pub use mock::{MockRead, MockSerialDevice};
pub use native::NativeSerialDevice;

/// A raw, blocking serial device.
pub trait SerialDevice: Send {
    /// Reads up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` when the device timeout elapsed without data.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `bytes` and flushes them to the device.
    fn write_all_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Returns a second handle to the same device.
    fn try_clone_device(&self) -> io::Result<Box<dyn SerialDevice>>;
}

type SharedDevice = Arc<Mutex<Option<Box<dyn SerialDevice>>>>;

/// The open serial device, shared between the read loop and the client
/// command writers.
pub struct SerialEndpoint {
    path: String,
    baud_rate: u32,
    reader: SharedDevice,
    writer: SharedDevice,
    open: AtomicBool,
}

impl SerialEndpoint {
    /// Opens the serial device at `path`.
    ///
    /// The port is configured as 8 data bits, no parity, one stop bit, with
    /// `read_timeout` as the blocking read timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DeviceUnavailable`] if the device does not
    /// exist, is busy, or access is denied.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, BridgeError> {
        let device = NativeSerialDevice::open(path, baud_rate, read_timeout).map_err(|e| {
            BridgeError::DeviceUnavailable {
                path: path.to_string(),
                source: e.into(),
            }
        })?;

        Self::from_device(path, baud_rate, Box::new(device))
    }

    /// Builds an endpoint over an already-open device.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DeviceUnavailable`] if the device cannot be
    /// cloned into a separate write handle.
    pub fn from_device(
        path: impl Into<String>,
        baud_rate: u32,
        device: Box<dyn SerialDevice>,
    ) -> Result<Self, BridgeError> {
        let path = path.into();
        let writer = device
            .try_clone_device()
            .map_err(|source| BridgeError::DeviceUnavailable {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            baud_rate,
            reader: Arc::new(Mutex::new(Some(device))),
            writer: Arc::new(Mutex::new(Some(writer))),
            open: AtomicBool::new(true),
        })
    }

    /// The device path this endpoint was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// `true` until [`SerialEndpoint::close`] is called.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Reads up to `max_len` bytes that are currently available.
    ///
    /// Returns an empty vector if nothing arrived within the device timeout
    /// or if the endpoint has been closed.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TransientReadFailure`] for any I/O error from
    /// the device (e.g. the USB cable was pulled).
    pub async fn read_available(&self, max_len: usize) -> Result<Vec<u8>, BridgeError> {
        if !self.is_open() {
            return Ok(Vec::new());
        }

        let reader = Arc::clone(&self.reader);
        let result = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
            let mut guard = reader.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(device) = guard.as_mut() else {
                return Ok(Vec::new());
            };

            let mut buf = vec![0u8; max_len.max(1)];
            let n = device.read_bytes(&mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await;

        match result {
            Ok(read) => read.map_err(BridgeError::TransientReadFailure),
            Err(join_err) => Err(BridgeError::TransientReadFailure(io::Error::other(join_err))),
        }
    }

    /// Writes `line` followed by `\n` to the device.
    ///
    /// Writes from concurrent callers are serialized.  No acknowledgement is
    /// awaited from the device.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DeviceWrite`] if the device rejects the write.
    pub async fn write_line(&self, line: &str) -> Result<WriteOutcome, BridgeError> {
        if !self.is_open() {
            return Ok(WriteOutcome::Skipped);
        }

        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        let writer = Arc::clone(&self.writer);
        let result = tokio::task::spawn_blocking(move || -> io::Result<WriteOutcome> {
            let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                Some(device) => {
                    device.write_all_bytes(&bytes)?;
                    Ok(WriteOutcome::Written)
                }
                None => Ok(WriteOutcome::Skipped),
            }
        })
        .await;

        match result {
            Ok(write) => write.map_err(BridgeError::DeviceWrite),
            Err(join_err) => Err(BridgeError::DeviceWrite(io::Error::other(join_err))),
        }
    }

    /// Closes the device.  Later reads return nothing and later writes are
    /// skipped.
    ///
    /// Waits at most one device read timeout for an in-flight read to
    /// finish.  Calling `close` again is a no-op.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }

        let reader = Arc::clone(&self.reader);
        let writer = Arc::clone(&self.writer);
        let closed = tokio::task::spawn_blocking(move || {
            writer.lock().unwrap_or_else(PoisonError::into_inner).take();
            reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        })
        .await;

        if let Err(e) = closed {
            debug!("serial close task failed: {e}");
        }
        info!("serial closed: {}", self.path);
    }
}

#[async_trait]
impl SerialLink for SerialEndpoint {
    async fn read_available(&self, max_len: usize) -> Result<Vec<u8>, BridgeError> {
        SerialEndpoint::read_available(self, max_len).await
    }

    async fn write_line(&self, line: &str) -> Result<WriteOutcome, BridgeError> {
        SerialEndpoint::write_line(self, line).await
    }

    fn is_open(&self) -> bool {
        SerialEndpoint::is_open(self)
    }

    async fn close(&self) {
        SerialEndpoint::close(self).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
