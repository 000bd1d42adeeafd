//! Server configuration.

use std::time::Duration;

use studio_settings::StudioSettings;

/// Runtime configuration for one studio server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Loopback host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-client outbound queue length.
    pub send_queue_capacity: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence after which a client is dropped.
    pub heartbeat_timeout: Duration,
    /// How long a request may stay active.
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Derive the runtime config from loaded settings.
    pub fn from_settings(settings: &StudioSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            max_message_size: server.max_message_size,
            send_queue_capacity: server.send_queue_capacity,
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            request_timeout: settings.requests.timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&StudioSettings::default())
    }
}
