//! ShrikeOS monitor serial bridge: entry point.
//!
//! This binary opens the board's USB serial console and relays it to any
//! number of browser dashboards over WebSocket.  Every line the board prints
//! becomes one text frame for every connected dashboard; every text frame a
//! dashboard sends becomes one line written to the board.
//!
//! # Why a separate bridge process?
//!
//! Browsers cannot open serial ports portably.  The bridge owns the device
//! exclusively and exposes it as a plain `ws://` endpoint the dashboard can
//! reach from any browser on the same machine.
//!
//! # Usage
//!
//! ```text
//! shrike-bridge [OPTIONS]
//!
//! Options:
//!   --port    <DEVICE>  Serial device path [default: platform specific]
//!   --ws-port <PORT>    WebSocket listener port [default: 8765]
//!   --ws-bind <ADDR>    WebSocket bind address [default: 127.0.0.1]
//!   --baud    <RATE>    Serial baud rate [default: 115200]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable             | Default            | Description              |
//! |----------------------|--------------------|--------------------------|
//! | `SHRIKE_SERIAL_PORT` | platform specific  | Serial device path       |
//! | `SHRIKE_WS_PORT`     | `8765`             | WebSocket listener port  |
//! | `SHRIKE_WS_BIND`     | `127.0.0.1`        | WebSocket bind address   |
//! | `SHRIKE_BAUD`        | `115200`           | Serial baud rate         |
//!
//! # Exit status
//!
//! `0` after a clean Ctrl+C shutdown; `1` if the device cannot be opened,
//! the listener cannot be bound, or the arguments are invalid.

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shrike_bridge::domain::config::{DEFAULT_BAUD_RATE, DEFAULT_WS_PORT};
use shrike_bridge::domain::{default_device_path, BridgeConfig, BridgeError};
use shrike_bridge::infrastructure::run_bridge;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// ShrikeOS monitor serial bridge.
///
/// Relays newline-delimited text between the board's serial console and
/// browser dashboards connected over WebSocket.
#[derive(Debug, Parser)]
#[command(
    name = "shrike-bridge",
    about = "Serial-to-WebSocket line relay for the ShrikeOS monitor dashboard",
    version
)]
struct Cli {
    /// Serial device the board is attached to.
    ///
    /// Typically `/dev/ttyACM0` on Linux, `/dev/tty.usbmodem*` on macOS and
    /// `COM3` on Windows.
    #[arg(long, visible_alias = "device", default_value = default_device_path(), env = "SHRIKE_SERIAL_PORT")]
    port: String,

    /// TCP port for the WebSocket server to listen on.
    #[arg(long, default_value_t = DEFAULT_WS_PORT, env = "SHRIKE_WS_PORT")]
    ws_port: u16,

    /// IP address to bind the WebSocket server to.
    ///
    /// The bridge has no authentication.  Only use `0.0.0.0` on a trusted
    /// network.
    #[arg(long, default_value = "127.0.0.1", env = "SHRIKE_WS_BIND")]
    ws_bind: String,

    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, env = "SHRIKE_BAUD")]
    baud: u32,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--ws-bind` is not a valid IP address.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let ip: IpAddr = self
            .ws_bind
            .parse()
            .with_context(|| format!("invalid WebSocket bind address: '{}'", self.ws_bind))?;

        Ok(BridgeConfig {
            device_path: self.port,
            baud_rate: self.baud,
            ws_bind_addr: SocketAddr::new(ip, self.ws_port),
            ..BridgeConfig::default()
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. `tracing_subscriber` is initialised; `RUST_LOG` selects the level
///    (default `info`).
/// 2. CLI arguments are parsed into a [`BridgeConfig`].
/// 3. A Ctrl+C handler is spawned that clears the shared running flag.
/// 4. [`run_bridge`] opens the device, binds the listener and relays until
///    the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_bridge_config()?;

    info!(
        "ShrikeOS serial bridge starting: device={} @ {} baud, ws={}",
        config.device_path, config.baud_rate, config.ws_bind_addr
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    if let Err(e) = run_bridge(config, running).await {
        error!("{}: {e}", failure_headline(&e));
        if let Some(hint) = e.remediation() {
            error!("hint: {hint}");
        }
        return Err(e.into());
    }

    info!("ShrikeOS serial bridge stopped");
    Ok(())
}

/// Opening words for the final error line: startup failures read differently
/// from errors raised while relaying.
fn failure_headline(err: &BridgeError) -> &'static str {
    if err.is_fatal() {
        "cannot start bridge"
    } else {
        "bridge stopped with error"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
