//! ClientRegistry: the set of connected dashboards and the broadcast fan-out.
//!
//! # Per-client queues
//!
//! Each [`ClientConnection`] owns the sending half of a bounded `mpsc`
//! queue.  The receiving half is drained by that client's WebSocket writer
//! task.  Broadcasting is a non-blocking `try_send` into every queue, so a
//! slow client can never delay the serial read loop or the other clients.
//!
//! # Overflow and closure policy
//!
//! If a client's queue is full (it is not keeping up) or already closed (its
//! writer task ended), the client is logged and removed from the registry.
//! Removal drops the queue sender; the writer task drains what is left,
//! sees the queue close, and ends the WebSocket session with a Close frame.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::LineBroadcaster;
use crate::domain::{BridgeError, ClientId, ClientSendFailure};

/// One registered client: its identity and outbound queue.
#[derive(Debug)]
pub struct ClientConnection {
    id: ClientId,
    remote: SocketAddr,
    tx: mpsc::Sender<String>,
}

impl ClientConnection {
    /// Creates a connection with a fresh [`ClientId`] and an outbound queue
    /// holding at most `capacity` lines.
    ///
    /// Returns the connection (to register) and the queue receiver (for the
    /// client's writer task).
    pub fn new(remote: SocketAddr, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id: Uuid::new_v4(),
            remote,
            tx,
        };
        (conn, rx)
    }

    /// The client's identity.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The client's remote socket address.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    fn try_send(&self, line: &str) -> Result<(), ClientSendFailure> {
        match self.tx.try_send(line.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ClientSendFailure::Lagging),
            Err(TrySendError::Closed(_)) => Err(ClientSendFailure::Closed),
        }
    }
}

/// Concurrency-safe set of connected clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientConnection>>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client and returns its id.
    pub async fn add(&self, conn: ClientConnection) -> ClientId {
        let id = conn.id;
        let remote = conn.remote;
        let count = {
            let mut clients = self.clients.write().await;
            clients.insert(id, conn);
            clients.len()
        };
        debug!("registered client {id} ({remote}); {count} connected");
        id
    }

    /// Removes a client.  Returns `false` if it was not registered.
    pub async fn remove(&self, id: ClientId) -> bool {
        self.clients.write().await.remove(&id).is_some()
    }

    /// Number of registered clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// `true` when no client is registered.
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Queues `line` for every registered client.
    ///
    /// Returns how many clients accepted the line.  Clients that could not
    /// accept it are removed; the failure is never returned to the caller.
    pub async fn broadcast_line(&self, line: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        {
            let clients = self.clients.read().await;
            for conn in clients.values() {
                match conn.try_send(line) {
                    Ok(()) => delivered += 1,
                    Err(reason) => {
                        let err = BridgeError::ClientSendFailure {
                            client: conn.id,
                            reason,
                        };
                        warn!("{err} ({}); disconnecting", conn.remote);
                        failed.push(conn.id);
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut clients = self.clients.write().await;
            for id in failed {
                clients.remove(&id);
            }
        }

        delivered
    }

    /// Removes every client, which closes each client's outbound queue.
    pub async fn disconnect_all(&self) {
        let drained: Vec<ClientConnection> = {
            let mut clients = self.clients.write().await;
            clients.drain().map(|(_, conn)| conn).collect()
        };

        if !drained.is_empty() {
            info!("closing {} client connection(s)", drained.len());
        }
    }
}

#[async_trait]
impl LineBroadcaster for ClientRegistry {
    async fn broadcast_line(&self, line: &str) -> usize {
        ClientRegistry::broadcast_line(self, line).await
    }

    async fn disconnect_all(&self) {
        ClientRegistry::disconnect_all(self).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_add_and_remove_client() {
        // Arrange
        let registry = ClientRegistry::new();
        let (conn, _rx) = ClientConnection::new(addr(5000), 8);

        // Act
        let id = registry.add(conn).await;

        // Assert
        assert_eq!(registry.len().await, 1);
        assert!(registry.remove(id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_absent_client_is_noop() {
        // Arrange
        let registry = ClientRegistry::new();
        let (conn, _rx) = ClientConnection::new(addr(5000), 8);
        let kept = registry.add(conn).await;

        // Act
        let removed = registry.remove(Uuid::new_v4()).await;

        // Assert: nothing removed, the other member is untouched
        assert!(!removed);
        assert_eq!(registry.len().await, 1);
        assert!(registry.remove(kept).await);
    }

    #[tokio::test]
    async fn test_remove_twice_is_idempotent() {
        let registry = ClientRegistry::new();
        let (conn, _rx) = ClientConnection::new(addr(5000), 8);
        let id = registry.add(conn).await;

        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        // Arrange
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = ClientConnection::new(addr(5001), 8);
        let (b, mut rx_b) = ClientConnection::new(addr(5002), 8);
        registry.add(a).await;
        registry.add(b).await;

        // Act
        let delivered = registry.broadcast_line("TEMP=42").await;

        // Assert
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.recv().await.as_deref(), Some("TEMP=42"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("TEMP=42"));
    }

    #[tokio::test]
    async fn test_broadcast_with_one_closed_client_delivers_to_the_rest() {
        // Arrange: three clients, one of which has already gone away
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = ClientConnection::new(addr(5001), 8);
        let (b, rx_b) = ClientConnection::new(addr(5002), 8);
        let (c, mut rx_c) = ClientConnection::new(addr(5003), 8);
        registry.add(a).await;
        let closed_id = registry.add(b).await;
        registry.add(c).await;
        drop(rx_b);

        // Act
        let delivered = registry.broadcast_line("UPTIME=5").await;

        // Assert
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.recv().await.as_deref(), Some("UPTIME=5"));
        assert_eq!(rx_c.recv().await.as_deref(), Some("UPTIME=5"));
        assert_eq!(registry.len().await, 2);
        assert!(!registry.remove(closed_id).await, "closed client must be removed");
    }

    #[tokio::test]
    async fn test_lagging_client_is_disconnected_without_affecting_others() {
        // Arrange: a slow client with room for a single line
        let registry = ClientRegistry::new();
        let (slow, mut rx_slow) = ClientConnection::new(addr(5001), 1);
        let (fast, mut rx_fast) = ClientConnection::new(addr(5002), 8);
        let slow_id = registry.add(slow).await;
        registry.add(fast).await;

        // Act: two lines while the slow client reads nothing
        assert_eq!(registry.broadcast_line("one").await, 2);
        assert_eq!(registry.broadcast_line("two").await, 1);

        // Assert: the slow client got what fit, then its queue closed
        assert_eq!(registry.len().await, 1);
        assert!(!registry.remove(slow_id).await);
        assert_eq!(rx_slow.recv().await.as_deref(), Some("one"));
        assert_eq!(rx_slow.recv().await, None);
        assert_eq!(rx_fast.recv().await.as_deref(), Some("one"));
        assert_eq!(rx_fast.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_broadcast_with_no_clients_delivers_nothing() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.broadcast_line("TEMP=42").await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_preserves_line_order_per_client() {
        let registry = ClientRegistry::new();
        let (conn, mut rx) = ClientConnection::new(addr(5001), 16);
        registry.add(conn).await;

        for i in 0..10 {
            registry.broadcast_line(&format!("L{i}")).await;
        }

        for i in 0..10 {
            assert_eq!(rx.recv().await, Some(format!("L{i}")));
        }
    }

    #[tokio::test]
    async fn test_disconnect_all_closes_every_queue() {
        // Arrange
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = ClientConnection::new(addr(5001), 8);
        let (b, mut rx_b) = ClientConnection::new(addr(5002), 8);
        registry.add(a).await;
        registry.add(b).await;

        // Act
        registry.disconnect_all().await;

        // Assert
        assert!(registry.is_empty().await);
        assert_eq!(rx_a.recv().await, None);
        assert_eq!(rx_b.recv().await, None);
    }

    #[tokio::test]
    async fn test_concurrent_add_remove_broadcast_stays_consistent() {
        // Arrange
        let registry = Arc::new(ClientRegistry::new());
        let mut tasks = Vec::new();

        // Act: 32 tasks each add a client, broadcast, and remove it again
        for i in 0..32u16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (conn, _rx) = ClientConnection::new(addr(6000 + i), 64);
                let id = registry.add(conn).await;
                registry.broadcast_line("tick").await;
                assert!(registry.remove(id).await);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Assert
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_connection_reports_remote_address() {
        let (conn, _rx) = ClientConnection::new(addr(7000), 4);
        assert_eq!(conn.remote(), addr(7000));
        assert!(!conn.id().is_nil());
    }
}
