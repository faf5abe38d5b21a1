//! WebSocket server: accept loop and per-client session handling.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from dashboards.
//! 3. Upgrading each connection to a WebSocket session.
//! 4. Registering the session in the [`ClientRegistry`].
//! 5. Running two concurrent halves per session:
//!    - **Writer**: drains the client's outbound queue into text frames.
//!    - **Reader**: hands each inbound text frame to
//!      [`Relay::forward_inbound`].
//! 6. Deregistering the session when either half finishes.
//!
//! The accept loop never waits on a session: each accepted connection is
//! handed to its own Tokio task, and the serial read loop runs on yet another
//! task, so accepting, reading the device and serving clients all progress
//! independently.
//!
//! Shutdown is triggered by a shared `AtomicBool` that is cleared by the
//! Ctrl+C handler (see `main.rs`).  Session tasks are tracked in a
//! [`SessionSet`] so the caller can wait for every Close frame to be flushed
//! (and abort stragglers) before the process exits.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use crate::application::{ForwardOutcome, Relay};
use crate::domain::BridgeError;
use crate::infrastructure::client_registry::{ClientConnection, ClientRegistry};

/// How often the accept loop re-checks the running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Handshake limit used until [`WsServer::with_handshake_timeout`] is called.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// A bound, not-yet-serving WebSocket listener.
pub struct WsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handshake_timeout: Duration,
}

impl WsServer {
    /// Binds the listener.
    ///
    /// Binding to port `0` picks a free port; use [`WsServer::local_addr`]
    /// to learn which.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ListenerBind`] if the port is in use or the
    /// process lacks permission to bind it.
    pub async fn bind(addr: SocketAddr) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BridgeError::ListenerBind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BridgeError::ListenerBind { addr, source })?;

        Ok(Self {
            listener,
            local_addr,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Drops connections that have not completed the WebSocket upgrade
    /// within `limit`.
    pub fn with_handshake_timeout(mut self, limit: Duration) -> Self {
        self.handshake_timeout = limit;
        self
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the accept loop until `running` is set to `false`.
    ///
    /// Each accepted connection is served on a dedicated Tokio task so that
    /// one slow client never blocks the others.  Returns the sessions that
    /// are still running; see [`SessionSet::drain`].
    pub async fn serve(
        self,
        relay: Arc<Relay>,
        registry: Arc<ClientRegistry>,
        queue_capacity: usize,
        running: Arc<AtomicBool>,
    ) -> SessionSet {
        info!("WebSocket server listening on ws://{}", self.local_addr);
        let mut sessions = JoinSet::new();

        loop {
            // Reap finished sessions so the set does not grow unbounded.
            while let Some(joined) = sessions.try_join_next() {
                log_join_error(joined);
            }

            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // Short timeout so the running flag is polled even when nobody
            // connects.
            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    let session = Session {
                        peer_addr,
                        relay: Arc::clone(&relay),
                        registry: Arc::clone(&registry),
                        queue_capacity,
                        handshake_timeout: self.handshake_timeout,
                    };
                    sessions.spawn(handle_client_session(stream, session));
                }
                Ok(Err(e)) => {
                    // e.g. too many open file descriptors; keep serving.
                    error!("accept error: {e}");
                }
                Err(_) => {}
            }
        }

        SessionSet { tasks: sessions }
    }
}

// ── Session tracking ──────────────────────────────────────────────────────────

/// Client session tasks still running when the accept loop stopped.
#[derive(Debug)]
pub struct SessionSet {
    tasks: JoinSet<()>,
}

impl SessionSet {
    /// Number of sessions not yet finished.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// `true` when every session has finished.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits up to `grace` for every session to end, then aborts the rest.
    ///
    /// Call after the registry has been emptied: each registered session
    /// then sends its Close frame and ends on its own.  Sessions still in
    /// the handshake, or whose peer stopped reading, are aborted, which
    /// drops their TCP connection.
    pub async fn drain(mut self, grace: Duration) {
        if self.tasks.is_empty() {
            return;
        }
        debug!("waiting for {} client session(s) to close", self.tasks.len());

        let finished = timeout(grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                log_join_error(joined);
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                "{} client session(s) still open after {grace:?}; aborting",
                self.tasks.len()
            );
            self.tasks.shutdown().await;
        }
    }
}

fn log_join_error(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("client session panicked: {e}");
        }
    }
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Everything one session task needs besides its socket.
struct Session {
    peer_addr: SocketAddr,
    relay: Arc<Relay>,
    registry: Arc<ClientRegistry>,
    queue_capacity: usize,
    handshake_timeout: Duration,
}

/// Top-level handler for one client session; logs the outcome.
async fn handle_client_session(stream: TcpStream, session: Session) {
    let peer_addr = session.peer_addr;
    match run_session(stream, session).await {
        Ok(()) => info!("dashboard disconnected from {peer_addr}"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of one client session.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails or times out.  Errors
/// after the handshake only end the session and are logged, not returned.
async fn run_session(stream: TcpStream, session: Session) -> anyhow::Result<()> {
    let Session {
        peer_addr,
        relay,
        registry,
        queue_capacity,
        handshake_timeout,
    } = session;

    let Ok(handshake) = timeout(handshake_timeout, accept_async(stream)).await else {
        anyhow::bail!("WebSocket handshake with {peer_addr} timed out after {handshake_timeout:?}");
    };
    let ws_stream =
        handshake.with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (conn, outbound_rx) = ClientConnection::new(peer_addr, queue_capacity);
    let client_id = registry.add(conn).await;

    // The relay enters Stopping before it empties the registry, so a client
    // added after that point is caught here and closed like the others.
    if relay.state().is_running() {
        info!("dashboard connected from {peer_addr}");
    } else {
        debug!("session {peer_addr}: bridge is stopping; closing");
        registry.remove(client_id).await;
    }

    let (ws_tx, ws_rx) = ws_stream.split();

    tokio::select! {
        _ = write_outbound(ws_tx, outbound_rx, peer_addr) => {
            debug!("session {peer_addr}: writer ended");
        }
        _ = read_inbound(ws_rx, &relay, peer_addr) => {
            debug!("session {peer_addr}: reader ended");
        }
    }

    registry.remove(client_id).await;
    Ok(())
}

/// Sends queued lines as text frames until the queue closes or the socket
/// fails.  A closed queue means the registry dropped this client (shutdown
/// or lagging), so the socket is closed politely.
async fn write_outbound<S>(
    mut ws_tx: S,
    mut outbound_rx: mpsc::Receiver<String>,
    peer_addr: SocketAddr,
) where
    S: futures_util::Sink<WsMessage, Error = WsError> + Unpin,
{
    while let Some(line) = outbound_rx.recv().await {
        if let Err(e) = ws_tx.send(WsMessage::Text(line)).await {
            debug!("session {peer_addr}: send failed: {e}");
            return;
        }
    }

    debug!("session {peer_addr}: outbound queue closed; closing socket");
    if let Err(e) = ws_tx.close().await {
        debug!("session {peer_addr}: close failed: {e}");
    }
}

/// Forwards every inbound message to the device until the client goes away.
async fn read_inbound<R>(mut ws_rx: R, relay: &Relay, peer_addr: SocketAddr)
where
    R: futures_util::Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let ws_msg = match ws_rx.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!("session {peer_addr}: WebSocket closed");
                break;
            }
            Some(Err(e)) => {
                warn!("session {peer_addr}: WebSocket error: {e}");
                break;
            }
            None => {
                debug!("session {peer_addr}: stream ended");
                break;
            }
        };

        match ws_msg {
            WsMessage::Text(text) => {
                log_outcome(peer_addr, relay.forward_inbound(&text).await);
            }
            WsMessage::Binary(bytes) => {
                // Not expected from the dashboard, but any bytes are text to
                // the board.
                let text = String::from_utf8_lossy(&bytes);
                log_outcome(peer_addr, relay.forward_inbound(&text).await);
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            WsMessage::Close(_) => {
                debug!("session {peer_addr}: Close frame received");
                break;
            }
        }
    }
}

fn log_outcome(peer_addr: SocketAddr, outcome: ForwardOutcome) {
    match outcome {
        ForwardOutcome::Forwarded | ForwardOutcome::Ignored => {}
        ForwardOutcome::DeviceClosed => {
            debug!("session {peer_addr}: device closed; command dropped");
        }
        ForwardOutcome::Failed => {
            debug!("session {peer_addr}: command dropped after write failure");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    use crate::domain::RelayTiming;
    use crate::infrastructure::serial_port::{MockSerialDevice, SerialEndpoint};

    fn idle_relay(registry: &Arc<ClientRegistry>) -> Arc<Relay> {
        let serial = SerialEndpoint::from_device(
            "/dev/mock0",
            115_200,
            Box::new(MockSerialDevice::new()),
        )
        .unwrap();
        Arc::new(Relay::new(
            Arc::new(serial),
            Arc::clone(registry) as Arc<dyn crate::application::LineBroadcaster>,
            RelayTiming::default(),
            1024,
        ))
    }

    #[tokio::test]
    async fn test_bind_port_zero_reports_real_port() {
        // Arrange / Act
        let server = WsServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        // Assert
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.local_addr().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_taken_port_is_listener_bind_error() {
        // Arrange: occupy a port
        let first = WsServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        // Act
        let second = WsServer::bind(first.local_addr()).await;

        // Assert
        match second {
            Err(BridgeError::ListenerBind { addr, .. }) => assert_eq!(addr, first.local_addr()),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("binding a taken port must fail"),
        }
    }

    #[tokio::test]
    async fn test_stalled_handshake_is_dropped_after_timeout() {
        // Arrange: a peer that opens TCP but never sends the upgrade
        let server = WsServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
            .with_handshake_timeout(Duration::from_millis(100));
        let addr = server.local_addr();
        let registry = Arc::new(ClientRegistry::new());
        let relay = idle_relay(&registry);
        relay.start().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let serving = tokio::spawn(server.serve(relay, registry, 8, Arc::clone(&running)));

        // Act
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(3), stream.read(&mut buf))
            .await
            .expect("idle connection was never dropped");

        // Assert: the server closed the socket without a WebSocket session
        assert!(matches!(read, Ok(0) | Err(_)), "got {read:?}");

        running.store(false, Ordering::Relaxed);
        let sessions = serving.await.unwrap();
        sessions.drain(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_drain_aborts_sessions_still_in_handshake() {
        // Arrange: a long handshake limit so the session cannot end by itself
        let server = WsServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
            .with_handshake_timeout(Duration::from_secs(60));
        let addr = server.local_addr();
        let registry = Arc::new(ClientRegistry::new());
        let relay = idle_relay(&registry);
        relay.start().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let serving = tokio::spawn(server.serve(relay, registry, 8, Arc::clone(&running)));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Act
        running.store(false, Ordering::Relaxed);
        let sessions = serving.await.unwrap();
        assert_eq!(sessions.len(), 1);
        timeout(Duration::from_secs(3), sessions.drain(Duration::from_millis(100)))
            .await
            .expect("drain did not finish");

        // Assert: aborting the session dropped the connection
        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(3), stream.read(&mut buf))
            .await
            .expect("connection still open after drain");
        assert!(matches!(read, Ok(0) | Err(_)), "got {read:?}");
    }
}
