//! # studio-server
//!
//! Local-only coordination layer between browser tabs and one host agent.
//!
//! - [`token`]: the session credential gating every HTTP and WebSocket request
//! - [`websocket`]: connection registry, per-client sessions, message dispatch
//! - [`protocol`]: typed wire messages and the validating parser
//! - [`coordinator`]: the single-flight request state machine
//! - [`correlator`]: maps agent lifecycle events onto coordinator transitions
//! - [`actions`], [`templates`]: file/editor and prompt collaborators
//! - [`studio`]: [`StudioSession`], the explicit ensure/stop/rotate lifecycle

#![deny(unsafe_code)]

pub mod actions;
pub mod config;
pub mod coordinator;
pub mod correlator;
pub mod http;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod studio;
pub mod templates;
pub mod token;
pub mod websocket;

pub use studio::{ServerInfo, StudioSession};

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;
    use serde_json::Value;
    use studio_core::{AgentBridge, AgentEvent, AgentMessage, BridgeError, RequestId};
    use tokio::sync::{broadcast, mpsc};

    use crate::websocket::connection::ClientConnection;
    use crate::websocket::registry::ConnectionRegistry;

    /// In-memory agent that records prompts and emits events on demand.
    pub struct FakeBridge {
        events: broadcast::Sender<AgentEvent>,
        submitted: Mutex<Vec<String>>,
        entries: Mutex<Vec<AgentMessage>>,
        fail: AtomicBool,
        busy: AtomicBool,
    }

    impl FakeBridge {
        pub fn new() -> Self {
            let (events, _) = broadcast::channel(64);
            Self {
                events,
                submitted: Mutex::new(Vec::new()),
                entries: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                busy: AtomicBool::new(false),
            }
        }

        pub fn submitted(&self) -> Vec<String> {
            self.submitted.lock().clone()
        }

        pub fn fail_submissions(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn set_entries(&self, entries: Vec<AgentMessage>) {
            *self.entries.lock() = entries;
        }

        pub fn set_busy(&self, busy: bool) {
            self.busy.store(busy, Ordering::SeqCst);
        }

        pub fn emit(&self, event: AgentEvent) {
            let _ = self.events.send(event);
        }
    }

    impl AgentBridge for FakeBridge {
        fn submit(&self, prompt: &str) -> Result<(), BridgeError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BridgeError::Rejected("agent refused the prompt".into()));
            }
            self.submitted.lock().push(prompt.to_string());
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
            self.events.subscribe()
        }

        fn entries(&self) -> Vec<AgentMessage> {
            self.entries.lock().clone()
        }

        fn is_busy(&self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }
    }

    /// Register a client whose outbound queue is `rx`.
    pub fn make_client(
        registry: &ConnectionRegistry,
        id: &str,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(64);
        let conn = Arc::new(ClientConnection::new(id.into(), tx));
        registry
            .register(Arc::clone(&conn), registry.generation())
            .unwrap();
        (conn, rx)
    }

    /// Everything queued for a client so far, parsed.
    pub fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    pub fn rid(s: &str) -> RequestId {
        RequestId::parse(s).unwrap()
    }
}
