//! `StudioSession`: the explicit lifecycle around one studio server.
//!
//! A session owns every component and can be started, stopped, and started
//! again. Nothing is process-global; hosts construct one session per agent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use studio_core::{AgentBridge, InitialDocument, StudioError};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::actions::{FileActions, StudioActions};
use crate::config::ServerConfig;
use crate::coordinator::RequestCoordinator;
use crate::correlator::ResponseCorrelator;
use crate::http::DEFAULT_PAGE;
use crate::server::{self, AppState};
use crate::shutdown::ShutdownCoordinator;
use crate::templates::{PlainTemplates, PromptTemplates};
use crate::token::TokenGate;
use crate::websocket::connection::CloseReason;
use crate::websocket::registry::ConnectionRegistry;

/// How long `stop_server` waits for server tasks before aborting them.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a running studio can be reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerInfo {
    /// Bound loopback address.
    pub addr: SocketAddr,
    /// Page URL including the current token.
    pub url: String,
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: ShutdownCoordinator,
}

/// One studio instance bound to one agent.
pub struct StudioSession {
    config: Arc<ServerConfig>,
    gate: Arc<TokenGate>,
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<RequestCoordinator>,
    correlator: Arc<ResponseCorrelator>,
    bridge: Arc<dyn AgentBridge>,
    actions: Arc<dyn StudioActions>,
    templates: Arc<dyn PromptTemplates>,
    initial_document: Arc<RwLock<InitialDocument>>,
    page: Arc<str>,
    running: Mutex<Option<RunningServer>>,
}

impl StudioSession {
    /// Create a stopped session for `bridge`.
    ///
    /// Defaults: files resolve against the current directory, built-in
    /// prompt templates, and the built-in page.
    pub fn new(config: ServerConfig, bridge: Arc<dyn AgentBridge>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let coordinator = Arc::new(RequestCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&bridge),
            config.request_timeout,
        ));
        let correlator = Arc::new(ResponseCorrelator::new(
            Arc::clone(&coordinator),
            Arc::clone(&bridge),
        ));
        let base_dir = std::env::current_dir().unwrap_or_else(|_| ".".into());
        Self {
            config: Arc::new(config),
            gate: Arc::new(TokenGate::new()),
            registry,
            coordinator,
            correlator,
            bridge,
            actions: Arc::new(FileActions::new(base_dir)),
            templates: Arc::new(PlainTemplates),
            initial_document: Arc::new(RwLock::new(InitialDocument::blank())),
            page: Arc::from(DEFAULT_PAGE),
            running: Mutex::new(None),
        }
    }

    /// Use `actions` for save and editor requests.
    #[must_use]
    pub fn with_actions(mut self, actions: Arc<dyn StudioActions>) -> Self {
        self.actions = actions;
        self
    }

    /// Use `templates` to build critique and annotation prompts.
    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn PromptTemplates>) -> Self {
        self.templates = templates;
        self
    }

    /// Serve `html` at `/`.
    #[must_use]
    pub fn with_page(mut self, html: impl Into<String>) -> Self {
        self.page = Arc::from(html.into());
        self
    }

    /// Replace the document handed to clients on their first handshake.
    pub fn set_initial_document(&self, document: InitialDocument) {
        *self.initial_document.write() = document;
    }

    /// The request state machine.
    pub fn coordinator(&self) -> &Arc<RequestCoordinator> {
        &self.coordinator
    }

    /// Connected clients.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The current token.
    pub fn token(&self) -> String {
        self.gate.current()
    }

    /// Start the server unless it is already listening.
    ///
    /// Binding is the only failure and surfaces as [`StudioError::Bind`].
    #[instrument(skip_all)]
    pub async fn ensure_server(&self) -> Result<ServerInfo, StudioError> {
        let mut running = self.running.lock().await;
        if let Some(server) = running.as_ref() {
            return Ok(self.info(server.addr));
        }

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(StudioError::Bind)?;
        let addr = listener.local_addr().map_err(StudioError::Bind)?;
        let mut shutdown = ShutdownCoordinator::new();
        let cancel = shutdown.token();

        // subscribe before seeding so nothing emitted in between is lost
        let events = self.bridge.subscribe();
        self.correlator.seed();
        shutdown.spawn(
            "correlator",
            Arc::clone(&self.correlator).run(events, cancel.clone()),
        );
        shutdown.spawn(
            "http",
            server::serve(listener, server::router(self.app_state()), cancel),
        );

        info!(%addr, "studio server listening");
        *running = Some(RunningServer { addr, shutdown });
        Ok(self.info(addr))
    }

    /// Stop the server if it is running.
    ///
    /// Cancels any active request, closes every client with the shutdown
    /// code, retires the token, and waits (bounded) for the server tasks. Returns `false` if it
    /// was not running.
    #[instrument(skip_all)]
    pub async fn stop_server(&self) -> bool {
        let Some(server) = self.running.lock().await.take() else {
            return false;
        };
        let _ = self.coordinator.clear_active("the studio server stopped");
        let closed = self.registry.close_all(CloseReason::SHUTDOWN);
        // the token lives only as long as the server that issued it
        self.gate.reset();
        let clean = server.shutdown.shutdown(STOP_TIMEOUT).await;
        info!(addr = %server.addr, closed, clean, "studio server stopped");
        true
    }

    /// Mint a new token and disconnect every client.
    ///
    /// Returns the new address and URL when the server is running.
    pub async fn rotate_token(&self) -> Option<ServerInfo> {
        let _ = self.gate.rotate(&self.registry);
        self.server_info().await
    }

    /// Address and URL of the running server.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|server| self.info(server.addr))
    }

    fn info(&self, addr: SocketAddr) -> ServerInfo {
        ServerInfo {
            addr,
            url: format!("http://{addr}/?token={}", self.gate.current()),
        }
    }

    fn app_state(&self) -> AppState {
        AppState {
            config: Arc::clone(&self.config),
            gate: Arc::clone(&self.gate),
            registry: Arc::clone(&self.registry),
            coordinator: Arc::clone(&self.coordinator),
            actions: Arc::clone(&self.actions),
            templates: Arc::clone(&self.templates),
            initial_document: Arc::clone(&self.initial_document),
            page: Arc::clone(&self.page),
        }
    }
}
