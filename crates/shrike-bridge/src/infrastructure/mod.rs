//! Infrastructure layer for shrike-bridge.
//!
//! The infrastructure layer handles all I/O: the serial device, the
//! WebSocket listener and the per-client sessions.
//!
//! # Responsibilities
//!
//! - Opening the serial device and running its blocking I/O off the runtime
//! - Binding a TCP listener for dashboard WebSocket connections
//! - Performing the WebSocket upgrade handshake
//! - Tracking connected clients and fanning lines out to them
//! - Spawning per-session Tokio tasks
//! - Handling the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Line framing (that is `shrike-core`)
//! - Relay policy such as trimming, retry and ordering (application layer)
//! - Configuration parsing (that is done in `main.rs`)

pub mod bridge;
pub mod client_registry;
pub mod serial_port;
pub mod ws_server;

pub use bridge::{run_bridge, run_bridge_with, run_bridge_with_listener};
pub use client_registry::{ClientConnection, ClientRegistry};
pub use serial_port::SerialEndpoint;
pub use ws_server::WsServer;
