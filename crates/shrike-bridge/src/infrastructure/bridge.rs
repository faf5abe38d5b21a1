//! Composition root: opens the device, binds the listener and runs the relay.
//!
//! Startup order matters.  The serial device is opened first, so a missing
//! or inaccessible board aborts the process before any port is bound.  The
//! listener is bound second; if that fails the already-open device is closed
//! again before the error is returned.
//!
//! Three entry points are provided so tests can enter at any stage:
//!
//! | Function                      | Opens device | Binds listener |
//! |-------------------------------|--------------|----------------|
//! | [`run_bridge`]                | yes          | yes            |
//! | [`run_bridge_with`]           | no           | yes            |
//! | [`run_bridge_with_listener`]  | no           | no             |

use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::application::{LineBroadcaster, Relay, SerialLink};
use crate::domain::{BridgeConfig, BridgeError};
use crate::infrastructure::client_registry::ClientRegistry;
use crate::infrastructure::serial_port::SerialEndpoint;
use crate::infrastructure::ws_server::WsServer;

/// How long shutdown waits for client sessions to flush their Close frames
/// before aborting them.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs the bridge against the real serial device named in `config`.
///
/// Returns when `running` is cleared and shutdown has completed.
///
/// # Errors
///
/// - [`BridgeError::DeviceUnavailable`] if the device cannot be opened.  No
///   listener is bound in that case.
/// - [`BridgeError::ListenerBind`] if the WebSocket port cannot be bound.
pub async fn run_bridge(config: BridgeConfig, running: Arc<AtomicBool>) -> Result<(), BridgeError> {
    let serial = SerialEndpoint::open(&config.device_path, config.baud_rate, config.read_timeout)?;
    info!(
        "serial opened: {} @ {} baud",
        serial.path(),
        serial.baud_rate()
    );
    run_bridge_with(config, Arc::new(serial), running).await
}

/// Runs the bridge over an already-open serial link.
///
/// # Errors
///
/// Returns [`BridgeError::ListenerBind`] if the WebSocket port cannot be
/// bound; `serial` is closed before returning.
pub async fn run_bridge_with(
    config: BridgeConfig,
    serial: Arc<dyn SerialLink>,
    running: Arc<AtomicBool>,
) -> Result<(), BridgeError> {
    let server = match WsServer::bind(config.ws_bind_addr).await {
        Ok(server) => server,
        Err(e) => {
            serial.close().await;
            return Err(e);
        }
    };

    run_bridge_with_listener(config, serial, server, running).await
}

/// Runs the bridge over an open serial link and a bound listener.
///
/// Spawns the serial read loop, serves WebSocket clients until `running` is
/// cleared, then shuts the relay down: clients are closed first, the device
/// last.  Returns only after every client session has ended, either by
/// sending its Close frame or by being aborted after a short grace period.
///
/// # Errors
///
/// Only fails if the relay refuses to start, which cannot happen for a
/// freshly built relay.
pub async fn run_bridge_with_listener(
    config: BridgeConfig,
    serial: Arc<dyn SerialLink>,
    server: WsServer,
    running: Arc<AtomicBool>,
) -> Result<(), BridgeError> {
    let registry = Arc::new(ClientRegistry::new());
    let broadcaster: Arc<dyn LineBroadcaster> = registry.clone();
    let relay = Arc::new(Relay::new(
        serial,
        broadcaster,
        config.timing,
        config.max_line_len,
    ));

    relay.start()?;
    info!("WebSocket server on ws://{}", server.local_addr());

    let server = server.with_handshake_timeout(config.handshake_timeout);

    let pump = {
        let relay = Arc::clone(&relay);
        let running = Arc::clone(&running);
        tokio::spawn(async move { relay.pump_serial(&running).await })
    };

    let sessions = server
        .serve(
            Arc::clone(&relay),
            registry,
            config.client_queue_capacity,
            running,
        )
        .await;

    relay.shutdown().await;
    sessions.drain(SESSION_DRAIN_TIMEOUT).await;

    match pump.await {
        Ok(stats) => debug!(
            "serial pump finished: {} byte(s), {} line(s), {} read failure(s), {} dropped line(s)",
            stats.bytes_read, stats.lines_broadcast, stats.read_failures, stats.dropped_lines
        ),
        Err(e) => warn!("serial pump task failed: {e}"),
    }

    info!("bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
