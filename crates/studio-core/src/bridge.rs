//! Boundary to the host agent.
//!
//! The host owns the agent; studio only submits prompts and observes the
//! agent's lifecycle. Events are delivered through a `tokio::sync::broadcast`
//! channel, in the order the host emitted them, at most once per subscriber.
//! Nothing here assumes an event arrives synchronously with the
//! [`AgentBridge::submit`] call that caused it.

use thiserror::Error;
use tokio::sync::broadcast;

use crate::content::AgentMessage;

/// Agent lifecycle notification.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    /// The agent began processing a turn (from any source).
    TurnStart,
    /// The agent finished processing a turn.
    TurnEnd,
    /// The agent produced a complete message.
    MessageProduced(AgentMessage),
    /// A conversation was opened.
    SessionStart,
    /// The active conversation changed.
    SessionSwitch,
    /// The host is shutting the conversation down.
    SessionShutdown,
}

impl AgentEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TurnStart => "turn_start",
            Self::TurnEnd => "turn_end",
            Self::MessageProduced(_) => "message_produced",
            Self::SessionStart => "session_start",
            Self::SessionSwitch => "session_switch",
            Self::SessionShutdown => "session_shutdown",
        }
    }
}

/// Synchronous failure to hand a prompt to the agent.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The host refused the prompt.
    #[error("{0}")]
    Rejected(String),
    /// No agent is attached.
    #[error("agent is not available")]
    Unavailable,
}

/// The only way studio talks to the host agent.
pub trait AgentBridge: Send + Sync {
    /// Submit `prompt` as a new user turn. Fire-and-forget: the outcome is
    /// observed through [`subscribe`](Self::subscribe).
    fn submit(&self, prompt: &str) -> Result<(), BridgeError>;

    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<AgentEvent>;

    /// Entries of the current conversation, oldest first.
    fn entries(&self) -> Vec<AgentMessage>;

    /// Whether the agent is mid-turn right now.
    fn is_busy(&self) -> bool {
        false
    }
}
