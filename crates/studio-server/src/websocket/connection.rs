//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use studio_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why the server closed a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code.
    pub code: u16,
    /// Close frame reason text.
    pub reason: &'static str,
}

impl CloseReason {
    /// The server is stopping.
    pub const SHUTDOWN: Self = Self {
        code: 4001,
        reason: "studio shutting down",
    };
    /// The session token was rotated.
    pub const INVALIDATED: Self = Self {
        code: 4002,
        reason: "session invalidated",
    };
    /// Too many clients are connected.
    pub const CAPACITY: Self = Self {
        code: 1013,
        reason: "studio at capacity",
    };
    /// The client stopped answering pings.
    pub const UNRESPONSIVE: Self = Self {
        code: 1001,
        reason: "client unresponsive",
    };
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<str>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether any frame has arrived since the last heartbeat check.
    is_alive: AtomicBool,
    /// When the last frame (of any kind) was received.
    last_seen: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
    /// Set once the first `hello` has been answered.
    greeted: AtomicBool,
    /// Server-initiated close, if any. First writer wins.
    close_reason: Mutex<Option<CloseReason>>,
    closed: CancellationToken,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            greeted: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Queue a text frame for the client without waiting.
    ///
    /// Returns `false` if the connection is closed or its queue is full, and
    /// increments the dropped message counter.
    pub fn send(&self, message: Arc<str>) -> bool {
        if !self.is_closed() && self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the write task to send a close frame and stop.
    ///
    /// Returns `false` if the connection was already closed; the first
    /// reason is the one delivered.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.closed.cancel();
        true
    }

    /// The server-initiated close reason, if the server closed this client.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Whether the server has closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Returns `true` exactly once: for the connection's first handshake.
    pub fn begin_handshake(&self) -> bool {
        !self.greeted.swap(true, Ordering::AcqRel)
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Duration since the last inbound frame (or connection establishment).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the client was heard from since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
