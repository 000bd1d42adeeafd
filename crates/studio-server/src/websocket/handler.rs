//! WebSocket message dispatch: parse a client frame and route it.

use std::path::Path;

use studio_core::{ActionError, DocumentSource, RequestId, RequestKind, StudioError};
use tracing::{debug, instrument, warn};

use super::connection::ClientConnection;
use crate::actions::StudioActions;
use crate::protocol::{ClientMessage, ServerMessage, parse_client_message};
use crate::server::AppState;

/// Handle one inbound text frame from `connection`.
///
/// Every reply that only concerns this client (handshake, validation errors,
/// busy rejections, action results) is unicast; state changes are broadcast
/// by the coordinator.
#[instrument(skip_all, fields(conn_id = %connection.id, message_type))]
pub fn handle_message(raw: &str, connection: &ClientConnection, state: &AppState) {
    if connection.is_closed() {
        debug!("ignoring frame on closed connection");
        return;
    }

    let message = match parse_client_message(raw) {
        Ok(message) => message,
        Err(rejection) => {
            warn!(error = %rejection.error, "rejected client message");
            reply_error(state, connection, &rejection.error, rejection.request_id);
            return;
        }
    };
    let _ = tracing::Span::current().record("message_type", message.type_name());
    debug!("dispatching client message");

    match message {
        ClientMessage::Hello => {
            let initial = connection
                .begin_handshake()
                .then(|| state.initial_document.read().clone());
            let _ = state.coordinator.greet(connection, initial);
        }
        ClientMessage::CritiqueRequest {
            request_id,
            document,
            lens,
        } => {
            let prompt = state.templates.critique(&document, lens);
            start_turn(state, connection, request_id, RequestKind::Critique, &prompt);
        }
        ClientMessage::AnnotationRequest { request_id, text } => {
            let prompt = state.templates.annotation(&text);
            start_turn(state, connection, request_id, RequestKind::Annotation, &prompt);
        }
        ClientMessage::SendRunRequest { request_id, text } => {
            start_turn(state, connection, request_id, RequestKind::Direct, &text);
        }
        ClientMessage::SaveAsRequest {
            request_id,
            path,
            content,
        } => run_action(state, connection, request_id, |actions, request_id| {
            let written = actions.save_as(Path::new(&path), &content)?;
            Ok(ServerMessage::Saved {
                request_id,
                path: written.display().to_string(),
            })
        }),
        ClientMessage::SaveOverRequest {
            request_id,
            content,
        } => {
            let target = {
                let doc = state.initial_document.read();
                (doc.source == DocumentSource::File)
                    .then(|| doc.path.clone())
                    .flatten()
            };
            run_action(state, connection, request_id, |actions, request_id| {
                let path = target.ok_or_else(|| {
                    ActionError::Unavailable("the document was not opened from a file".into())
                })?;
                actions.save_over(&path, &content)?;
                Ok(ServerMessage::Saved {
                    request_id,
                    path: path.display().to_string(),
                })
            });
        }
        ClientMessage::SendToEditorRequest {
            request_id,
            content,
        } => run_action(state, connection, request_id, |actions, request_id| {
            actions.send_to_editor(&content)?;
            Ok(ServerMessage::EditorLoaded { request_id })
        }),
        ClientMessage::GetLatestResponse => {
            let _ = state.coordinator.send_latest(connection);
        }
    }
}

fn start_turn(
    state: &AppState,
    connection: &ClientConnection,
    request_id: RequestId,
    kind: RequestKind,
    prompt: &str,
) {
    if let Err(err) = state.coordinator.start(request_id.clone(), kind, prompt) {
        debug!(request_id = %request_id, code = err.code(), "turn not started");
        reply_error(state, connection, &err, Some(request_id));
    }
}

fn run_action(
    state: &AppState,
    connection: &ClientConnection,
    request_id: RequestId,
    action: impl FnOnce(&dyn StudioActions, RequestId) -> Result<ServerMessage, ActionError>,
) {
    if state.coordinator.is_busy() {
        let err = StudioError::busy("a turn is in progress; try again when it finishes");
        reply_error(state, connection, &err, Some(request_id));
        return;
    }
    match action(state.actions.as_ref(), request_id.clone()) {
        Ok(reply) => {
            let _ = state.registry.unicast(connection, &reply);
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "action failed");
            reply_error(state, connection, &StudioError::Action(e), Some(request_id));
        }
    }
}

fn reply_error(
    state: &AppState,
    connection: &ClientConnection,
    err: &StudioError,
    request_id: Option<RequestId>,
) {
    let _ = state
        .registry
        .unicast(connection, &ServerMessage::from_error(err, request_id));
}
