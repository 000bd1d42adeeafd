//! HTTP route handlers.
//!
//! `/` and `/ws` require the session token; `/health` and `/favicon.ico` do
//! not. The token is checked before anything else happens, so a rejected
//! request has no side effects.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use metrics::counter;
use serde::Deserialize;
use tracing::warn;

use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::server::AppState;
use crate::websocket::session::run_ws_session;

/// Minimal client page; hosts normally supply their own.
pub const DEFAULT_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>studio</title></head>
<body>
<pre id="log"></pre>
<script>
const token = new URLSearchParams(location.search).get("token");
const ws = new WebSocket(`ws://${location.host}/ws?token=${encodeURIComponent(token)}`);
const log = (m) => { document.getElementById("log").textContent += m + "\n"; };
ws.onopen = () => ws.send(JSON.stringify({ type: "hello" }));
ws.onmessage = (e) => log(e.data);
ws.onclose = (e) => log(`closed ${e.code} ${e.reason}`);
</script>
</body>
</html>
"#;

/// Headers on every authenticated response; the page URL carries a live token.
const SECURITY_HEADERS: [(HeaderName, &str); 6] = [
    (header::CACHE_CONTROL, "no-store"),
    (header::PRAGMA, "no-cache"),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::REFERRER_POLICY, "no-referrer"),
    (HeaderName::from_static("cross-origin-opener-policy"), "same-origin"),
    (HeaderName::from_static("cross-origin-resource-policy"), "same-origin"),
];

/// `?token=` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    /// Presented token.
    pub token: Option<String>,
}

impl TokenQuery {
    fn is_valid(&self, state: &AppState) -> bool {
        self.token.as_deref().is_some_and(|t| state.gate.validate(t))
    }
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        [(header::CACHE_CONTROL, "no-store")],
        "invalid or missing session token",
    )
        .into_response()
}

/// GET /
pub async fn index(State(state): State<AppState>, Query(query): Query<TokenQuery>) -> Response {
    if !query.is_valid(&state) {
        warn!("rejected page request with invalid token");
        return forbidden();
    }
    (SECURITY_HEADERS, Html(state.page.to_string())).into_response()
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

/// GET /favicon.ico
pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Everything else.
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// GET /ws
///
/// The token is validated before the upgrade is even inspected; a bad token
/// never reaches the WebSocket layer.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // read before validating so a rotation in between is caught at register
    let generation = state.registry.generation();
    if !query.is_valid(&state) {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => "auth").increment(1);
        warn!("rejected websocket upgrade with invalid token");
        return forbidden();
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    let max_message_size = state.config.max_message_size;
    upgrade
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, state, generation))
}
