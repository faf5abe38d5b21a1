//! # shrike-core
//!
//! Pure building blocks for the ShrikeOS serial-to-WebSocket bridge.
//!
//! This crate has zero dependencies on async runtimes, sockets, or serial
//! drivers.  Everything in it can be exercised with plain byte slices.
//!
//! # Architecture overview (for beginners)
//!
//! The bridge sits between a USB serial board and any number of browser
//! dashboards.  The board prints newline-terminated text (telemetry, command
//! replies); the dashboards send newline-terminated commands back.
//!
//! This crate defines the two pieces of that relay that need no I/O:
//!
//! - **`framing`** – Turns an arbitrary stream of raw serial bytes into clean
//!   text lines.  Serial reads return whatever bytes happen to be available,
//!   so a single line may arrive split across several reads, or several lines
//!   may arrive in one read.  The [`LineFramer`] reassembles them.
//!
//! - **`lifecycle`** – The relay's `Starting → Running → Stopping` state
//!   machine.  Encoding the legal transitions in one place keeps the runtime
//!   code from ever "restarting" a relay that is already running.

pub mod framing;
pub mod lifecycle;

// Re-export the most-used types at the crate root so callers can write
// `shrike_core::LineFramer` instead of `shrike_core::framing::line_framer::LineFramer`.
pub use framing::line_framer::{LineFramer, DEFAULT_MAX_LINE_LEN};
pub use lifecycle::{LifecycleError, RelayState};
