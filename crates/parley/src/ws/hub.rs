//! Connection hub: live WebSocket connections and conversation watchers.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

use parley_protocol::ServerFrame;

/// Size of the per-connection send buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

/// Opaque handle for one live WebSocket connection.
pub type ConnectionId = u64;

/// A sender for server frames to a specific connection.
type FrameSender = mpsc::Sender<ServerFrame>;

/// Hub managing all live connections and conversation subscriptions.
///
/// A connection becomes a watcher of a conversation when it sends any
/// frame referencing it; outbound events for a conversation go to every
/// current watcher. The reverse map makes disconnect cleanup O(1) per
/// watched conversation instead of a scan.
pub struct ConnectionHub {
    next_id: AtomicU64,

    /// Connection ID -> send half of that connection's frame queue.
    connections: DashMap<ConnectionId, FrameSender>,

    /// Conversation ID -> set of watching connection IDs.
    watchers: DashMap<String, HashSet<ConnectionId>>,

    /// Connection ID -> conversations it watches (for removal).
    watching: DashMap<ConnectionId, HashSet<String>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            watchers: DashMap::new(),
            watching: DashMap::new(),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the connection id and the receive half of its frame queue;
    /// the caller owns draining it into the socket.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<ServerFrame>) {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        self.connections.insert(conn_id, tx);
        info!(conn_id, "registered WebSocket connection");
        (conn_id, rx)
    }

    /// Remove a connection and all of its subscriptions.
    pub fn unregister(&self, conn_id: ConnectionId) {
        self.connections.remove(&conn_id);

        if let Some((_, watched)) = self.watching.remove(&conn_id) {
            for conversation_id in watched {
                if let Some(mut set) = self.watchers.get_mut(&conversation_id) {
                    set.remove(&conn_id);
                    if set.is_empty() {
                        drop(set);
                        self.watchers.remove(&conversation_id);
                    }
                }
            }
        }
        info!(conn_id, "unregistered WebSocket connection");
    }

    /// Mark a connection as watching a conversation.
    pub fn watch(&self, conn_id: ConnectionId, conversation_id: &str) {
        let newly = self
            .watchers
            .entry(conversation_id.to_string())
            .or_default()
            .insert(conn_id);
        self.watching
            .entry(conn_id)
            .or_default()
            .insert(conversation_id.to_string());

        if newly {
            debug!(conn_id, conversation_id, "connection watching conversation");
        }
    }

    /// Send a frame to every connection watching a conversation.
    ///
    /// Delivery to a connection that has since closed is dropped without
    /// affecting the others.
    pub async fn broadcast(&self, conversation_id: &str, frame: ServerFrame) {
        let targets: Vec<ConnectionId> = self
            .watchers
            .get(conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        for conn_id in targets {
            let sender = self.connections.get(&conn_id).map(|tx| tx.clone());
            if let Some(tx) = sender
                && tx.send(frame.clone()).await.is_err()
            {
                debug!(conn_id, "dropping frame for closed connection");
            }
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections watching a conversation.
    pub fn watcher_count(&self, conversation_id: &str) -> usize {
        self.watchers
            .get(conversation_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}
