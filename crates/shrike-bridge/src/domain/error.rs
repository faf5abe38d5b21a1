//! Error taxonomy for the bridge.
//!
//! Only two variants ever stop the process, and only at startup:
//! [`BridgeError::DeviceUnavailable`] and [`BridgeError::ListenerBind`].
//! Everything else is contained where it happens: logged, and then either
//! retried (serial reads), dropped (serial writes) or turned into the removal
//! of one client (send failures).

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use super::ClientId;

/// Why a line could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSendFailure {
    /// The client's outbound queue is full; it is not keeping up.
    Lagging,
    /// The client's writer task has already ended.
    Closed,
}

impl fmt::Display for ClientSendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientSendFailure::Lagging => f.write_str("outbound queue full"),
            ClientSendFailure::Closed => f.write_str("connection closed"),
        }
    }
}

/// Errors produced by the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The serial device could not be opened.  Fatal at startup.
    #[error("cannot open serial device {path}: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A serial read failed.  The read loop backs off and retries.
    #[error("serial read failed: {0}")]
    TransientReadFailure(#[source] std::io::Error),

    /// A serial write failed.  The line is dropped.
    #[error("serial write failed: {0}")]
    DeviceWrite(#[source] std::io::Error),

    /// The WebSocket listener could not be bound.  Fatal at startup.
    #[error("failed to bind WebSocket listener on {addr}: {source}")]
    ListenerBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A line could not be delivered to one client.  That client is removed.
    #[error("send to client {client} failed: {reason}")]
    ClientSendFailure {
        client: ClientId,
        reason: ClientSendFailure,
    },

    /// The relay was asked to make a state change it does not allow.
    #[error(transparent)]
    Lifecycle(#[from] shrike_core::LifecycleError),
}

impl BridgeError {
    /// Returns `true` for errors that must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::DeviceUnavailable { .. } | BridgeError::ListenerBind { .. }
        )
    }

    /// A suggested fix to show the user, if one is known.
    pub fn remediation(&self) -> Option<String> {
        match self {
            BridgeError::DeviceUnavailable { path, .. } => Some(device_remediation(path)),
            BridgeError::ListenerBind { addr, .. } => Some(format!(
                "is another bridge already running? pick a free port with --ws-port (current: {})",
                addr.port()
            )),
            _ => None,
        }
    }
}

fn device_remediation(path: &str) -> String {
    if cfg!(windows) {
        format!("check that the board is plugged in and that {path} matches the port shown in Device Manager")
    } else {
        format!(
            "check that the board is plugged in, then try: sudo chmod 666 {path} \
             (or add your user to the 'dialout' group)"
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
