//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use studio_core::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, CloseReason};
use super::handler::handle_message;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_REJECTED_TOTAL, WS_CONNECTIONS_TOTAL,
};
use crate::server::AppState;

/// How long a server-closed session waits for its close frame to flush.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Floor for the ping period; `tokio::time::interval` rejects zero.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(100);

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code,
        reason: reason.reason.into(),
    }))
}

/// Run a WebSocket session for a client authenticated under `generation`.
///
/// 1. Registers the client, or closes it at once if the token was rotated
///    meanwhile or the studio is at capacity
/// 2. Dispatches incoming text frames through the handler
/// 3. Forwards queued outbound frames and sends periodic pings
/// 4. Sends the close frame when the server closes the connection
/// 5. Unregisters on disconnect
#[instrument(skip_all, fields(conn_id))]
pub async fn run_ws_session(ws: WebSocket, state: AppState, generation: u64) {
    let conn_id = ConnectionId::new();
    let _ = tracing::Span::current().record("conn_id", conn_id.as_str());
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<str>>(state.config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(conn_id, send_tx));

    if let Err(refused) = state.registry.register(Arc::clone(&connection), generation) {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => refused.as_str()).increment(1);
        warn!(reason = refused.as_str(), "refusing websocket client");
        let _ = ws_tx.send(close_message(refused.close_reason())).await;
        return;
    }

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let outbound_conn = Arc::clone(&connection);
    let heartbeat_interval = state.config.heartbeat_interval.max(MIN_PING_INTERVAL);
    let heartbeat_timeout = state.config.heartbeat_timeout;
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        // skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = outbound_conn.closed() => {
                    // flush what was queued before the close, then say goodbye
                    while let Ok(text) = send_rx.try_recv() {
                        if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    let reason = outbound_conn.close_reason().unwrap_or(CloseReason::SHUTDOWN);
                    let _ = ws_tx.send(close_message(reason)).await;
                    let _ = ws_tx.close().await;
                    return;
                }
                msg = send_rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                },
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_seen_elapsed() > heartbeat_timeout
                    {
                        warn!(timeout = ?heartbeat_timeout, "client unresponsive, disconnecting");
                        let _ = outbound_conn.close(CloseReason::UNRESPONSIVE);
                        continue;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            biased;
            () = connection.closed() => break,
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                };
                connection.mark_alive();
                match msg {
                    Message::Text(text) => handle_message(text.as_str(), &connection, &state),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_message(text, &connection, &state),
                        Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    let server_closed = connection.is_closed();
    let _ = state.registry.unregister(&connection.id);
    if server_closed {
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut outbound).await;
    }
    outbound.abort();

    info!(
        server_closed,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    // Full sessions need real sockets and are covered by tests/integration.rs.
    use super::*;

    #[test]
    fn close_message_carries_code_and_reason() {
        let Message::Close(Some(frame)) = close_message(CloseReason::INVALIDATED) else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, 4002);
        assert_eq!(frame.reason.as_str(), "session invalidated");
    }

    #[test]
    fn capacity_close_uses_try_again_later() {
        let Message::Close(Some(frame)) = close_message(CloseReason::CAPACITY) else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, 1013);
    }
}
