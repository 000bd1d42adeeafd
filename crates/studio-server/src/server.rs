//! Axum router and the state shared by its handlers.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use parking_lot::RwLock;
use studio_core::InitialDocument;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::actions::StudioActions;
use crate::config::ServerConfig;
use crate::coordinator::RequestCoordinator;
use crate::http;
use crate::templates::PromptTemplates;
use crate::token::TokenGate;
use crate::websocket::registry::ConnectionRegistry;

/// Shared state accessible from Axum handlers and WebSocket sessions.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration.
    pub config: Arc<ServerConfig>,
    /// Session token.
    pub gate: Arc<TokenGate>,
    /// Connected clients.
    pub registry: Arc<ConnectionRegistry>,
    /// Request state machine.
    pub coordinator: Arc<RequestCoordinator>,
    /// File and editor collaborators.
    pub actions: Arc<dyn StudioActions>,
    /// Prompt builders.
    pub templates: Arc<dyn PromptTemplates>,
    /// Editor seed handed out on first handshake.
    pub initial_document: Arc<RwLock<InitialDocument>>,
    /// Single-page client served at `/`.
    pub page: Arc<str>,
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(http::index))
        .route("/health", get(http::health))
        .route("/favicon.ico", get(http::favicon))
        .route("/ws", get(http::ws_upgrade))
        .fallback(http::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) {
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        error!(error = %e, "studio http server failed");
    }
}
