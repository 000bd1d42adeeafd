//! Wire messages exchanged with browser clients.
//!
//! Every message is a JSON object with a `type` discriminator. Inbound text is
//! parsed into a fully validated [`ClientMessage`] before anything is
//! dispatched; a partial match is a parse failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use studio_core::{InitialDocument, LastResponse, Lens, RequestId, RequestKind, StudioError};
use tracing::debug;

/// Message sent by a browser client.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Connection handshake.
    Hello,
    /// Critique `document` through the given lens.
    CritiqueRequest {
        /// Client correlation ID.
        request_id: RequestId,
        /// Document to critique.
        document: String,
        /// Critique focus.
        #[serde(default)]
        lens: Lens,
    },
    /// Annotate `text`.
    AnnotationRequest {
        /// Client correlation ID.
        request_id: RequestId,
        /// Text to annotate.
        text: String,
    },
    /// Send `text` to the agent verbatim.
    SendRunRequest {
        /// Client correlation ID.
        request_id: RequestId,
        /// Prompt text.
        text: String,
    },
    /// Write `content` to a new file.
    SaveAsRequest {
        /// Client correlation ID.
        request_id: RequestId,
        /// Destination path.
        path: String,
        /// File body.
        content: String,
    },
    /// Overwrite the file the initial document was loaded from.
    SaveOverRequest {
        /// Client correlation ID.
        request_id: RequestId,
        /// File body.
        content: String,
    },
    /// Load `content` into the host editor.
    SendToEditorRequest {
        /// Client correlation ID.
        request_id: RequestId,
        /// Editor body.
        content: String,
    },
    /// Pull the cached last response.
    GetLatestResponse,
}

impl ClientMessage {
    /// Wire name of the message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::CritiqueRequest { .. } => "critique_request",
            Self::AnnotationRequest { .. } => "annotation_request",
            Self::SendRunRequest { .. } => "send_run_request",
            Self::SaveAsRequest { .. } => "save_as_request",
            Self::SaveOverRequest { .. } => "save_over_request",
            Self::SendToEditorRequest { .. } => "send_to_editor_request",
            Self::GetLatestResponse => "get_latest_response",
        }
    }

    /// Correlation ID, for messages that carry one.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Hello | Self::GetLatestResponse => None,
            Self::CritiqueRequest { request_id, .. }
            | Self::AnnotationRequest { request_id, .. }
            | Self::SendRunRequest { request_id, .. }
            | Self::SaveAsRequest { request_id, .. }
            | Self::SaveOverRequest { request_id, .. }
            | Self::SendToEditorRequest { request_id, .. } => Some(request_id),
        }
    }

    /// Check payload constraints serde cannot express.
    fn validate(&self) -> Result<(), StudioError> {
        let (field, value) = match self {
            Self::Hello | Self::GetLatestResponse => return Ok(()),
            Self::CritiqueRequest { document, .. } => ("document", document),
            Self::AnnotationRequest { text, .. } | Self::SendRunRequest { text, .. } => {
                ("text", text)
            }
            Self::SaveAsRequest { path, content, .. } => {
                if path.trim().is_empty() {
                    return Err(StudioError::protocol("path must not be empty"));
                }
                ("content", content)
            }
            Self::SaveOverRequest { content, .. } | Self::SendToEditorRequest { content, .. } => {
                ("content", content)
            }
        };
        if value.trim().is_empty() {
            return Err(StudioError::protocol(format!("{field} must not be empty")));
        }
        Ok(())
    }
}

/// A message that could not be parsed.
#[derive(Debug)]
pub struct Rejection {
    /// Why it was rejected.
    pub error: StudioError,
    /// The request ID, if the raw message carried a valid one.
    pub request_id: Option<RequestId>,
}

/// Parse and fully validate one inbound text frame.
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, Rejection> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        debug!(error = %e, "inbound frame is not JSON");
        Rejection {
            error: StudioError::protocol("Malformed message: expected a JSON object"),
            request_id: None,
        }
    })?;

    let request_id = value
        .get("requestId")
        .and_then(Value::as_str)
        .and_then(|s| RequestId::parse(s).ok());

    if !value.get("type").is_some_and(Value::is_string) {
        return Err(Rejection {
            error: StudioError::protocol("Malformed message: missing type"),
            request_id,
        });
    }

    let message = ClientMessage::deserialize(value).map_err(|e| {
        debug!(error = %e, "inbound frame has an unknown shape");
        Rejection {
            error: StudioError::protocol("Unsupported or malformed message"),
            request_id: request_id.clone(),
        }
    })?;

    message
        .validate()
        .map_err(|error| Rejection { error, request_id })?;
    Ok(message)
}

/// Message sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Reply to `hello` with everything a (re)connecting client needs.
    HelloAck {
        /// Whether a new turn would be refused right now.
        busy: bool,
        /// Whether the agent is processing any turn.
        agent_busy: bool,
        /// The in-flight studio request.
        active_request_id: Option<RequestId>,
        /// Kind of the in-flight studio request.
        active_request_kind: Option<RequestKind>,
        /// Cached last response.
        last_response: Option<LastResponse>,
        /// Editor seed; only on a connection's first handshake.
        initial_document: Option<InitialDocument>,
    },
    /// A studio request was accepted.
    RequestStarted {
        /// Accepted request.
        request_id: RequestId,
        /// Its kind.
        kind: RequestKind,
    },
    /// Answer to a studio request.
    Response {
        /// Answered request.
        request_id: RequestId,
        /// Kind to render as.
        kind: RequestKind,
        /// Assistant text.
        markdown: String,
        /// Unix epoch milliseconds.
        timestamp: i64,
    },
    /// Agent output not tied to a studio request, or a pulled cache entry.
    LatestResponse {
        /// Kind to render as.
        kind: RequestKind,
        /// Assistant text.
        markdown: String,
        /// Unix epoch milliseconds.
        timestamp: i64,
    },
    /// Current coordination state.
    StudioState {
        /// Whether a new turn would be refused right now.
        busy: bool,
        /// Whether the agent is processing any turn.
        agent_busy: bool,
        /// The in-flight studio request.
        active_request_id: Option<RequestId>,
        /// Kind of the in-flight studio request.
        active_request_kind: Option<RequestKind>,
    },
    /// The message was refused because a turn is in flight.
    Busy {
        /// Refused request.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
        /// Human-readable explanation.
        message: String,
    },
    /// Something failed.
    Error {
        /// Failed request, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
        /// Machine-readable code.
        code: &'static str,
        /// Human-readable explanation.
        message: String,
    },
    /// A save action completed.
    Saved {
        /// Completed request.
        request_id: RequestId,
        /// Written path.
        path: String,
    },
    /// The editor accepted the content.
    EditorLoaded {
        /// Completed request.
        request_id: RequestId,
    },
}

impl ServerMessage {
    /// Build the client-facing message for `err`.
    ///
    /// Busy rejections become `busy`; everything else becomes `error`. The
    /// error's own request ID wins over `request_id`.
    pub fn from_error(err: &StudioError, request_id: Option<RequestId>) -> Self {
        let request_id = err.request_id().cloned().or(request_id);
        match err {
            StudioError::Busy { message } => Self::Busy {
                request_id,
                message: message.clone(),
            },
            _ => Self::Error {
                request_id,
                code: err.code(),
                message: err.to_string(),
            },
        }
    }

    /// A `latest_response` notice for a cached response.
    pub fn latest(response: &LastResponse) -> Self {
        Self::LatestResponse {
            kind: response.kind,
            markdown: response.markdown.clone(),
            timestamp: response.timestamp,
        }
    }

    /// Wire name of the message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::HelloAck { .. } => "hello_ack",
            Self::RequestStarted { .. } => "request_started",
            Self::Response { .. } => "response",
            Self::LatestResponse { .. } => "latest_response",
            Self::StudioState { .. } => "studio_state",
            Self::Busy { .. } => "busy",
            Self::Error { .. } => "error",
            Self::Saved { .. } => "saved",
            Self::EditorLoaded { .. } => "editor_loaded",
        }
    }
}
