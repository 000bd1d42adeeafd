//! Agent lifecycle events to coordinator transitions.

use std::sync::Arc;

use studio_core::content::latest_assistant_text;
use studio_core::{AgentBridge, AgentEvent, AgentMessage, LastResponse};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::RequestCoordinator;

/// Observes the agent and drives the [`RequestCoordinator`].
pub struct ResponseCorrelator {
    coordinator: Arc<RequestCoordinator>,
    bridge: Arc<dyn AgentBridge>,
}

impl ResponseCorrelator {
    /// Create a correlator for `bridge`'s events.
    pub fn new(coordinator: Arc<RequestCoordinator>, bridge: Arc<dyn AgentBridge>) -> Self {
        Self {
            coordinator,
            bridge,
        }
    }

    /// The latest assistant output in the current conversation.
    pub fn latest_from_entries(&self) -> Option<LastResponse> {
        latest_assistant_text(&self.bridge.entries()).map(LastResponse::inferred)
    }

    /// Load agent busy and the last response from the bridge, silently.
    pub fn seed(&self) {
        if let Some(response) = self.latest_from_entries() {
            self.coordinator.seed_last_response(Some(response));
        }
        if self.bridge.is_busy() {
            self.coordinator.set_agent_busy(true);
        }
    }

    /// Apply one event.
    pub fn handle_event(&self, event: &AgentEvent) {
        debug!(event = event.name(), "agent event");
        match event {
            AgentEvent::TurnStart => self.coordinator.set_agent_busy(true),
            AgentEvent::TurnEnd => self.coordinator.turn_ended(),
            AgentEvent::MessageProduced(message) => self.on_message(message),
            AgentEvent::SessionStart => {
                if let Some(response) = self.latest_from_entries() {
                    self.coordinator.seed_last_response(Some(response));
                }
            }
            AgentEvent::SessionSwitch => {
                let _ = self.coordinator.clear_active("the conversation was switched");
                if let Some(response) = self.latest_from_entries() {
                    self.coordinator.publish_last_response(response);
                }
            }
            AgentEvent::SessionShutdown => {
                let _ = self.coordinator.clear_active("the agent session shut down");
            }
        }
    }

    fn on_message(&self, message: &AgentMessage) {
        let Some(text) = message.assistant_text_content() else {
            debug!(role = ?message.role, "message carries no assistant text");
            return;
        };
        if !self.coordinator.complete(text.clone()) {
            let recorded = self.coordinator.record_out_of_band(text);
            debug!(kind = %recorded.kind, "recorded out-of-band agent output");
        }
    }

    /// Apply events until `cancel` fires or the bridge goes away.
    #[tracing::instrument(skip_all, name = "response_correlator")]
    pub async fn run(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<AgentEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("correlator cancelled");
                    break;
                }
                event = rx.recv() => match event {
                    Ok(event) => self.handle_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged = n, "correlator lagged, resyncing agent busy flag");
                        self.coordinator.set_agent_busy(self.bridge.is_busy());
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("agent event stream closed, correlator exiting");
                        break;
                    }
                },
            }
        }
    }
}
