//! Per-session access token.
//!
//! The token is embedded in the studio URL and must accompany every page load
//! and WebSocket upgrade. It is never logged.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::metrics::STUDIO_TOKEN_ROTATIONS_TOTAL;
use crate::websocket::connection::CloseReason;
use crate::websocket::registry::ConnectionRegistry;

/// Holds the current session token.
pub struct TokenGate {
    token: RwLock<String>,
}

impl TokenGate {
    /// Create a gate with a freshly minted token.
    pub fn new() -> Self {
        Self {
            token: RwLock::new(mint()),
        }
    }

    /// The current token.
    pub fn current(&self) -> String {
        self.token.read().clone()
    }

    /// Whether `candidate` is the current token.
    pub fn validate(&self, candidate: &str) -> bool {
        constant_time_eq(self.token.read().as_bytes(), candidate.as_bytes())
    }

    /// Replace the token without touching connections.
    ///
    /// Used when a server stops, so a URL from that run never opens the next
    /// one.
    pub fn reset(&self) {
        *self.token.write() = mint();
        debug!("session token reset");
    }

    /// Replace the token and close every client authenticated with the old one.
    ///
    /// The new token is in place before any client is closed, so a client
    /// that reconnects with the old URL is refused. Returns the new token.
    pub fn rotate(&self, registry: &ConnectionRegistry) -> String {
        let token = mint();
        self.token.write().clone_from(&token);
        let closed = registry.close_all(CloseReason::INVALIDATED);
        counter!(STUDIO_TOKEN_ROTATIONS_TOTAL).increment(1);
        info!(closed, "session token rotated");
        token
    }
}

impl Default for TokenGate {
    fn default() -> Self {
        Self::new()
    }
}

/// 32 random bytes, base64url without padding.
fn mint() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use studio_core::ConnectionId;
    use tokio::sync::mpsc;

    use crate::websocket::connection::ClientConnection;

    #[test]
    fn minted_token_is_url_safe() {
        let token = mint();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(mint(), mint());
    }

    #[test]
    fn validate_accepts_only_current_token() {
        let gate = TokenGate::new();
        let token = gate.current();
        assert!(gate.validate(&token));
        assert!(!gate.validate(""));
        assert!(!gate.validate(&token[..10]));
        assert!(!gate.validate(&format!("{token}x")));
    }

    #[test]
    fn rotate_invalidates_old_token_and_closes_clients() {
        let gate = TokenGate::new();
        let registry = ConnectionRegistry::new(4);
        let (tx, _rx) = mpsc::channel(4);
        let conn = Arc::new(ClientConnection::new("c1".into(), tx));
        registry.register(Arc::clone(&conn), 0).unwrap();

        let old = gate.current();
        let new = gate.rotate(&registry);

        assert_ne!(old, new);
        assert!(!gate.validate(&old));
        assert!(gate.validate(&new));
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(conn.close_reason(), Some(CloseReason::INVALIDATED));
    }

    #[test]
    fn repeated_rotation_leaves_only_last_token() {
        let gate = TokenGate::new();
        let registry = ConnectionRegistry::new(8);
        let mut tokens = vec![gate.current()];
        let mut clients = Vec::new();

        for i in 0..4 {
            let (tx, rx) = mpsc::channel(4);
            let conn = Arc::new(ClientConnection::new(ConnectionId::from(format!("c{i}").as_str()), tx));
            registry.register(Arc::clone(&conn), registry.generation()).unwrap();
            clients.push((conn, rx));
            tokens.push(gate.rotate(&registry));
            assert_eq!(registry.connection_count(), 0);
        }

        let (last, earlier) = tokens.split_last().unwrap();
        assert!(gate.validate(last));
        for token in earlier {
            assert!(!gate.validate(token));
        }
        for (conn, _) in &clients {
            assert_eq!(conn.close_reason(), Some(CloseReason::INVALIDATED));
        }
    }

    #[test]
    fn reset_replaces_token_and_keeps_connections() {
        let gate = TokenGate::new();
        let registry = ConnectionRegistry::new(4);
        let (tx, _rx) = mpsc::channel(4);
        let conn = Arc::new(ClientConnection::new("c1".into(), tx));
        registry.register(Arc::clone(&conn), 0).unwrap();
        let old = gate.current();

        gate.reset();

        assert!(!gate.validate(&old));
        assert!(gate.validate(&gate.current()));
        assert_eq!(registry.connection_count(), 1);
        assert!(!conn.is_closed());
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
