//! The relay loop: the heart of the bridge.
//!
//! Two independent activities run for the lifetime of the process:
//!
//! ```text
//! (a) serial → clients:  SerialLink::read_available → LineFramer::feed
//!                        → LineBroadcaster::broadcast_line   (pump_serial)
//!
//! (b) client → serial:   inbound text → trim → SerialLink::write_line
//!                                                        (forward_inbound)
//! ```
//!
//! # Architecture
//!
//! [`Relay`] depends only on the [`SerialLink`] and [`LineBroadcaster`]
//! traits and on `shrike-core`.  The infrastructure implementations are
//! injected at construction time, which makes every path here unit-testable
//! with in-memory doubles.
//!
//! # Failure containment
//!
//! Nothing in this module returns an error to its caller.  A failed serial
//! read is logged and retried after a back-off; a failed serial write is
//! logged and the command is dropped; per-client delivery failures are
//! handled inside the broadcaster.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use shrike_core::{LifecycleError, LineFramer, RelayState};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain::config::RelayTiming;
use crate::domain::BridgeError;

// ── Seams ─────────────────────────────────────────────────────────────────────

/// Result of a serial write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The line was handed to the device.
    Written,
    /// The device is closed; the line was silently skipped.
    Skipped,
}

/// Access to the serial device.
///
/// The infrastructure implementation is `SerialEndpoint`; tests use
/// recording doubles.
#[async_trait]
pub trait SerialLink: Send + Sync {
    /// Reads whatever bytes are available, up to `max_len`.
    ///
    /// An empty vector means "nothing arrived within the device timeout" and
    /// is not an error.
    async fn read_available(&self, max_len: usize) -> Result<Vec<u8>, BridgeError>;

    /// Writes `line` followed by `\n`.
    async fn write_line(&self, line: &str) -> Result<WriteOutcome, BridgeError>;

    /// `true` until [`SerialLink::close`] has been called.
    fn is_open(&self) -> bool;

    /// Releases the device.  Calling it twice is harmless.
    async fn close(&self);
}

/// Fan-out of serial lines to the connected clients.
#[async_trait]
pub trait LineBroadcaster: Send + Sync {
    /// Queues `line` for every client and returns how many accepted it.
    ///
    /// Must never fail or block on a slow client.
    async fn broadcast_line(&self, line: &str) -> usize;

    /// Closes every client connection.
    async fn disconnect_all(&self);
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// What happened to one inbound client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Written to the device.
    Forwarded,
    /// Empty after trimming; nothing to send.
    Ignored,
    /// The device is closed; the message was dropped.
    DeviceClosed,
    /// The device write failed; the message was dropped.
    Failed,
}

/// Counters reported by [`Relay::pump_serial`] when it returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub bytes_read: u64,
    pub lines_broadcast: u64,
    pub read_failures: u64,
    pub dropped_lines: u64,
}

// ── Relay ─────────────────────────────────────────────────────────────────────

/// The bidirectional relay between one serial device and many clients.
pub struct Relay {
    serial: Arc<dyn SerialLink>,
    clients: Arc<dyn LineBroadcaster>,
    timing: RelayTiming,
    max_line_len: usize,
    state: Mutex<RelayState>,
}

impl Relay {
    /// Creates a relay in the `Starting` state.
    pub fn new(
        serial: Arc<dyn SerialLink>,
        clients: Arc<dyn LineBroadcaster>,
        timing: RelayTiming,
        max_line_len: usize,
    ) -> Self {
        Self {
            serial,
            clients,
            timing,
            max_line_len,
            state: Mutex::new(RelayState::Starting),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the relay from `Starting` to `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] if the relay is already
    /// running or stopping.
    pub fn start(&self) -> Result<(), LifecycleError> {
        self.transition(RelayState::Running)?;
        info!("relay running");
        Ok(())
    }

    /// Runs the serial → clients activity until `running` is cleared or the
    /// relay leaves the `Running` state.
    ///
    /// Lines are broadcast in the order they were decoded.  Read failures
    /// are retried forever: the device may be re-plugged and recover.
    pub async fn pump_serial(&self, running: &AtomicBool) -> PumpStats {
        let mut framer = LineFramer::with_max_line_len(self.max_line_len);
        let mut stats = PumpStats::default();
        let mut consecutive_failures: u32 = 0;

        while running.load(Ordering::Relaxed) && self.state().is_running() {
            match self.serial.read_available(self.timing.read_chunk_size).await {
                Ok(bytes) => {
                    if consecutive_failures > 0 {
                        info!("serial read recovered after {consecutive_failures} failure(s)");
                        consecutive_failures = 0;
                    }

                    if bytes.is_empty() {
                        sleep(self.timing.idle_poll_interval).await;
                        continue;
                    }

                    stats.bytes_read += bytes.len() as u64;
                    for line in framer.feed(&bytes) {
                        let delivered = self.clients.broadcast_line(&line).await;
                        debug!("RX ← device: {line} ({delivered} client(s))");
                        stats.lines_broadcast += 1;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    stats.read_failures += 1;
                    warn!(
                        "{e} (failure #{consecutive_failures}); retrying in {:?}",
                        self.timing.read_error_backoff
                    );
                    sleep(self.timing.read_error_backoff).await;
                }
            }
        }

        stats.dropped_lines = framer.dropped_lines();
        debug!("serial pump stopped: {stats:?}");
        stats
    }

    /// Forwards one inbound client message to the device.
    ///
    /// The message is trimmed; empty messages are ignored.  A trailing `\n`
    /// is appended by the serial link.
    pub async fn forward_inbound(&self, text: &str) -> ForwardOutcome {
        let command = text.trim();
        if command.is_empty() {
            return ForwardOutcome::Ignored;
        }

        if !self.serial.is_open() {
            debug!("device closed; dropping command {command:?}");
            return ForwardOutcome::DeviceClosed;
        }

        match self.serial.write_line(command).await {
            Ok(WriteOutcome::Written) => {
                info!("TX → device: {command}");
                ForwardOutcome::Forwarded
            }
            Ok(WriteOutcome::Skipped) => ForwardOutcome::DeviceClosed,
            Err(e) => {
                warn!("dropping command {command:?}: {e}");
                ForwardOutcome::Failed
            }
        }
    }

    /// Stops the relay: closes every client and then the device.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let previous = self.state();
        // Every state may move to Stopping, so this cannot fail.
        let _ = self.transition(RelayState::Stopping);
        if previous != RelayState::Stopping {
            info!("relay stopping");
        }

        self.clients.disconnect_all().await;
        self.serial.close().await;
    }

    fn transition(&self, next: RelayState) -> Result<RelayState, LifecycleError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = state.transition(next)?;
        Ok(*state)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
