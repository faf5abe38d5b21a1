//! Domain layer for shrike-bridge.
//!
//! The domain layer contains plain types with no dependencies on networking,
//! serial drivers, or async runtimes.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - Client identity types
//! - The error taxonomy shared by every other layer
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, `WebSocket` or serial port types
//! - Environment variable or CLI parsing (that is done in `main.rs`)

pub mod config;
pub mod error;

pub use config::{default_device_path, BridgeConfig, RelayTiming};
pub use error::{BridgeError, ClientSendFailure};

/// Identity of one connected WebSocket client.
///
/// A fresh UUID v4 is assigned on accept.  The remote socket address is kept
/// separately for logging because the same address can reconnect.
pub type ClientId = uuid::Uuid;
