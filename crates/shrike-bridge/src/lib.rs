//! shrike-bridge library crate.
//!
//! This crate relays newline-delimited text between one serial device (the
//! ShrikeOS board) and any number of WebSocket clients (the browser
//! dashboard).
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser dashboards (text frames over WebSocket)
//!         ↕
//! [shrike-bridge]
//!   ├── domain/           Pure types: BridgeConfig, BridgeError, ClientId
//!   ├── application/      Relay loop: serial → framer → broadcast, client → serial
//!   └── infrastructure/
//!         ├── serial_port/     Serial endpoint (serialport crate) + mock device
//!         ├── client_registry/ Concurrent set of connected clients
//!         ├── ws_server/       WebSocket accept loop (tokio-tungstenite)
//!         └── bridge/          Wires everything together
//!         ↕
//! Serial device (USB CDC, 115200 baud)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no async code and opens no sockets or devices.
//! - `application` depends on `domain`, `shrike-core`, and two traits
//!   ([`application::SerialLink`], [`application::LineBroadcaster`]) that the
//!   infrastructure layer implements.
//! - `infrastructure` depends on all other layers plus `tokio`,
//!   `tokio-tungstenite`, and `serialport`.

/// Domain layer: configuration and error types (no I/O).
pub mod domain;

/// Application layer: the relay loop.
pub mod application;

/// Infrastructure layer: serial port, client registry, WebSocket server.
pub mod infrastructure;
