//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It can be constructed from CLI arguments (preferred for production) or from
//! sensible defaults (useful for local development and tests).
//!
//! Only the device path and the WebSocket port are normally changed; the
//! remaining fields are timing knobs with defaults that match the board's
//! USB CDC behaviour.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use shrike_core::DEFAULT_MAX_LINE_LEN;

/// Default WebSocket port the dashboard auto-connects to.
pub const DEFAULT_WS_PORT: u16 = 8765;

/// Default serial baud rate of the board's console.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Returns the serial device path the board usually enumerates as on this
/// platform.
///
/// | Platform | Default                  |
/// |----------|--------------------------|
/// | Linux    | `/dev/ttyACM0`           |
/// | macOS    | `/dev/tty.usbmodem1101`  |
/// | Windows  | `COM3`                   |
pub fn default_device_path() -> &'static str {
    if cfg!(target_os = "windows") {
        "COM3"
    } else if cfg!(target_os = "macos") {
        "/dev/tty.usbmodem1101"
    } else {
        "/dev/ttyACM0"
    }
}

/// Timing parameters for the serial read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTiming {
    /// How long to wait after a read that returned no bytes.
    pub idle_poll_interval: Duration,
    /// How long to back off after a read that failed with an I/O error.
    pub read_error_backoff: Duration,
    /// Maximum bytes requested from the device per read.
    pub read_chunk_size: usize,
}

impl Default for RelayTiming {
    fn default() -> Self {
        Self {
            idle_poll_interval: Duration::from_millis(50),
            read_error_backoff: Duration::from_secs(1),
            read_chunk_size: 256,
        }
    }
}

/// All runtime configuration for the serial bridge.
///
/// Build this struct once at startup and hand it to
/// [`crate::infrastructure::run_bridge`].
///
/// # Example
///
/// ```rust
/// use shrike_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8765);
/// assert!(cfg.ws_bind_addr.ip().is_loopback());
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Serial device path (e.g. `/dev/ttyACM0` or `COM3`).
    pub device_path: String,

    /// Serial baud rate.
    pub baud_rate: u32,

    /// Address the WebSocket server binds to.
    ///
    /// Loopback by default: the bridge has no authentication, so exposing it
    /// on a LAN interface must be an explicit choice.
    pub ws_bind_addr: SocketAddr,

    /// Read timeout configured on the serial device itself.
    ///
    /// A blocking read returns after at most this long, which bounds how
    /// quickly the read loop notices a shutdown request.
    pub read_timeout: Duration,

    /// Serial read loop timing.
    pub timing: RelayTiming,

    /// Capacity of each client's outbound line queue.
    ///
    /// A client whose queue is full when a line is broadcast is considered
    /// too slow and is disconnected.
    pub client_queue_capacity: usize,

    /// Longest serial line (in bytes) that is relayed; longer lines are
    /// dropped.
    pub max_line_len: usize,

    /// How long a new TCP connection may take to complete the WebSocket
    /// upgrade before it is dropped.
    pub handshake_timeout: Duration,
}

impl Default for BridgeConfig {
    /// Returns a `BridgeConfig` suitable for local development.
    ///
    /// | Field                  | Default                        |
    /// |------------------------|--------------------------------|
    /// | device_path            | [`default_device_path`]        |
    /// | baud_rate              | `115200`                       |
    /// | ws_bind_addr           | `127.0.0.1:8765`               |
    /// | read_timeout           | 100 ms                         |
    /// | timing                 | 50 ms idle, 1 s backoff, 256 B |
    /// | client_queue_capacity  | 64                             |
    /// | max_line_len           | 64 KiB                         |
    /// | handshake_timeout      | 5 s                            |
    fn default() -> Self {
        Self {
            device_path: default_device_path().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            ws_bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_WS_PORT)),
            read_timeout: Duration::from_millis(100),
            timing: RelayTiming::default(),
            client_queue_capacity: 64,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
