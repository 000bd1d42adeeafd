//! Set of live client connections and fan-out to them.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use studio_core::ConnectionId;
use tracing::{debug, warn};

use super::connection::{ClientConnection, CloseReason};
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE};
use crate::protocol::ServerMessage;

/// Why [`ConnectionRegistry::register`] refused a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterError {
    /// The token was rotated after the connection authenticated.
    Invalidated,
    /// `max_connections` clients are already registered.
    AtCapacity,
}

impl RegisterError {
    /// The close frame to send the refused client.
    pub fn close_reason(self) -> CloseReason {
        match self {
            Self::Invalidated => CloseReason::INVALIDATED,
            Self::AtCapacity => CloseReason::CAPACITY,
        }
    }

    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalidated => "invalidated",
            Self::AtCapacity => "capacity",
        }
    }
}

struct Inner {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    /// Bumped by every [`ConnectionRegistry::close_all`].
    generation: u64,
}

/// Tracks connected clients and delivers server messages to them.
///
/// Delivery never blocks: each client has a bounded queue and a client whose
/// queue is full or closed simply misses the message.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry admitting at most `max_connections` clients.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                connections: HashMap::new(),
                generation: 0,
            }),
            max_connections,
        }
    }

    /// Current invalidation generation.
    ///
    /// Read this before checking a client's token and pass it to
    /// [`register`](Self::register), so a rotation in between is detected.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Add a connection authenticated under `generation`.
    pub fn register(
        &self,
        connection: Arc<ClientConnection>,
        generation: u64,
    ) -> Result<(), RegisterError> {
        let mut inner = self.inner.write();
        if inner.generation != generation {
            return Err(RegisterError::Invalidated);
        }
        if inner.connections.len() >= self.max_connections {
            return Err(RegisterError::AtCapacity);
        }
        let _ = inner.connections.insert(connection.id.clone(), connection);
        gauge!(WS_CONNECTIONS_ACTIVE).set(inner.connections.len() as f64);
        Ok(())
    }

    /// Remove a connection. Unknown IDs are ignored.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.connections.remove(id).is_some();
        if removed {
            gauge!(WS_CONNECTIONS_ACTIVE).set(inner.connections.len() as f64);
        }
        removed
    }

    /// Send `message` to every registered client.
    ///
    /// Returns the number of clients that accepted it.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let Some(json) = encode(message) else {
            return 0;
        };
        let inner = self.inner.read();
        let mut delivered = 0;
        for conn in inner.connections.values() {
            if deliver(conn, &json, message) {
                delivered += 1;
            }
        }
        debug!(
            message_type = message.type_name(),
            recipients = inner.connections.len(),
            delivered,
            "broadcast"
        );
        delivered
    }

    /// Send `message` to one client.
    pub fn unicast(&self, connection: &ClientConnection, message: &ServerMessage) -> bool {
        encode(message).is_some_and(|json| deliver(connection, &json, message))
    }

    /// Close every client with `reason` and invalidate in-progress handshakes.
    ///
    /// Returns the number of clients closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let mut inner = self.inner.write();
        inner.generation += 1;
        let closed = inner.connections.len();
        for (_, conn) in inner.connections.drain() {
            let _ = conn.close(reason);
        }
        gauge!(WS_CONNECTIONS_ACTIVE).set(0.0);
        debug!(closed, code = reason.code, generation = inner.generation, "closed all clients");
        closed
    }

    /// Number of registered clients.
    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }
}

fn encode(message: &ServerMessage) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(message_type = message.type_name(), error = %e, "failed to serialize message");
            None
        }
    }
}

fn deliver(conn: &ClientConnection, json: &Arc<str>, message: &ServerMessage) -> bool {
    if conn.send(Arc::clone(json)) {
        return true;
    }
    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
    warn!(
        conn_id = %conn.id,
        message_type = message.type_name(),
        total_drops = conn.drop_count(),
        "failed to send message to client"
    );
    false
}
