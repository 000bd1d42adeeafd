//! Error taxonomy for the studio coordinator.
//!
//! Every variant of [`StudioError`] is recovered locally by the server; the
//! only one that escapes to the surrounding command layer is
//! [`StudioError::Bind`], raised when the loopback listener cannot be bound.
//!
//! Each variant maps to a stable machine-readable [`code`](StudioError::code)
//! that travels on the wire next to the human-readable message.

use thiserror::Error;

use crate::bridge::BridgeError;
use crate::ids::RequestId;

// ── Error code constants ────────────────────────────────────────────

/// Invalid or missing session token.
pub const AUTH_ERROR: &str = "AUTH_ERROR";
/// Malformed JSON or unknown message shape.
pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
/// A turn is already active or the agent is busy.
pub const BUSY: &str = "BUSY";
/// The active request exceeded its timeout window.
pub const TIMEOUT: &str = "TIMEOUT";
/// The agent bridge refused the prompt.
pub const SUBMISSION_FAILED: &str = "SUBMISSION_FAILED";
/// The agent turn ended without usable assistant text.
pub const INCOMPLETE_TURN: &str = "INCOMPLETE_TURN";
/// The active request was cleared by a conversation change or shutdown.
pub const REQUEST_CANCELLED: &str = "REQUEST_CANCELLED";
/// A file or editor action failed.
pub const ACTION_FAILED: &str = "ACTION_FAILED";
/// The listener could not be bound.
pub const BIND_FAILED: &str = "BIND_FAILED";

/// Errors raised while coordinating studio requests.
#[derive(Debug, Error)]
pub enum StudioError {
    /// Invalid or missing token on an HTTP request or WebSocket upgrade.
    #[error("invalid or missing session token")]
    Auth,

    /// The client sent something that is not a known message shape.
    #[error("{message}")]
    Protocol {
        /// What was wrong with the message.
        message: String,
    },

    /// A turn-starting or blocking action arrived while busy.
    #[error("{message}")]
    Busy {
        /// Human-readable explanation.
        message: String,
    },

    /// The active request ran past its timeout window.
    #[error("request {request_id} timed out after {timeout_secs}s without a response")]
    Timeout {
        /// The request that timed out.
        request_id: RequestId,
        /// Length of the window that elapsed.
        timeout_secs: u64,
    },

    /// Handing the prompt to the agent failed synchronously.
    #[error("failed to submit prompt to the agent: {0}")]
    Submission(#[from] BridgeError),

    /// The agent turn ended with no assistant text while a request was active.
    #[error("agent turn ended without a response for request {request_id}")]
    IncompleteTurn {
        /// The request that was left unanswered.
        request_id: RequestId,
    },

    /// The active request was cleared before it could resolve.
    #[error("request {request_id} was cancelled: {reason}")]
    Cancelled {
        /// The request that was cleared.
        request_id: RequestId,
        /// Why it was cleared.
        reason: String,
    },

    /// A save or editor action failed.
    #[error("{0}")]
    Action(#[from] ActionError),

    /// The HTTP/WebSocket listener could not be bound.
    #[error("failed to bind studio listener: {0}")]
    Bind(#[source] std::io::Error),
}

impl StudioError {
    /// Convenience constructor for protocol errors.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Convenience constructor for busy rejections.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth => AUTH_ERROR,
            Self::Protocol { .. } => PROTOCOL_ERROR,
            Self::Busy { .. } => BUSY,
            Self::Timeout { .. } => TIMEOUT,
            Self::Submission(_) => SUBMISSION_FAILED,
            Self::IncompleteTurn { .. } => INCOMPLETE_TURN,
            Self::Cancelled { .. } => REQUEST_CANCELLED,
            Self::Action(_) => ACTION_FAILED,
            Self::Bind(_) => BIND_FAILED,
        }
    }

    /// The request this error is about, when there is one.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Timeout { request_id, .. }
            | Self::IncompleteTurn { request_id }
            | Self::Cancelled { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

/// Failure reported by a file or editor collaborator.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Filesystem failure.
    #[error("file operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// The action is not possible in the current state.
    #[error("{0}")]
    Unavailable(String),
}

/// Result type for studio operations.
pub type Result<T> = std::result::Result<T, StudioError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn rid(s: &str) -> RequestId {
        RequestId::parse(s).unwrap()
    }

    #[test]
    fn codes_are_distinct() {
        let errors = [
            StudioError::Auth,
            StudioError::protocol("x"),
            StudioError::busy("x"),
            StudioError::Timeout {
                request_id: rid("r1"),
                timeout_secs: 1,
            },
            StudioError::Submission(BridgeError::Rejected("x".into())),
            StudioError::IncompleteTurn {
                request_id: rid("r1"),
            },
            StudioError::Cancelled {
                request_id: rid("r1"),
                reason: "x".into(),
            },
            StudioError::Action(ActionError::Unavailable("x".into())),
            StudioError::Bind(std::io::Error::other("x")),
        ];
        let mut codes: Vec<_> = errors.iter().map(StudioError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn timeout_message_names_request() {
        let err = StudioError::Timeout {
            request_id: rid("req_42"),
            timeout_secs: 300,
        };
        let msg = err.to_string();
        assert!(msg.contains("req_42"));
        assert!(msg.contains("300s"));
        assert_eq!(err.request_id().map(RequestId::as_str), Some("req_42"));
    }

    #[test]
    fn protocol_error_has_no_request_id() {
        assert!(StudioError::protocol("bad").request_id().is_none());
    }

    #[test]
    fn bridge_error_converts_to_submission() {
        let err: StudioError = BridgeError::Unavailable.into();
        assert_matches!(err, StudioError::Submission(BridgeError::Unavailable));
        assert_eq!(err.code(), SUBMISSION_FAILED);
    }

    #[test]
    fn io_error_converts_to_action() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StudioError = ActionError::from(io).into();
        assert_matches!(err, StudioError::Action(ActionError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }
}
