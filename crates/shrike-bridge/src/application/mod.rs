//! Application layer for shrike-bridge.
//!
//! The application layer knows *what* the bridge does (move lines between
//! the serial device and the clients) but delegates *how* to the
//! infrastructure layer through two traits:
//!
//! - [`SerialLink`] – read bytes from / write lines to the device
//! - [`LineBroadcaster`] – hand a line to every connected client
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or serial ports (that is infrastructure)
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod relay;

pub use relay::{
    ForwardOutcome, LineBroadcaster, PumpStats, Relay, SerialLink, WriteOutcome,
};
