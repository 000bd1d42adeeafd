//! Settings types.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use studio_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Shortest accepted ping interval, in milliseconds.
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Shortest accepted request timeout, in milliseconds.
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudioSettings {
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Request lifecycle settings.
    pub requests: RequestSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl StudioSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let ip: IpAddr = self.server.host.parse().map_err(|_| {
            SettingsError::InvalidValue(format!("host {:?} is not an IP address", self.server.host))
        })?;
        if !ip.is_loopback() {
            return Err(SettingsError::InvalidValue(format!(
                "host {ip} is not a loopback address"
            )));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue("maxConnections must be at least 1".into()));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "sendQueueCapacity must be at least 1".into(),
            ));
        }
        if self.requests.timeout_ms < MIN_REQUEST_TIMEOUT_MS {
            return Err(SettingsError::InvalidValue(format!(
                "request timeoutMs must be at least {MIN_REQUEST_TIMEOUT_MS}"
            )));
        }
        if self.server.heartbeat_interval_ms < MIN_HEARTBEAT_INTERVAL_MS {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeatIntervalMs must be at least {MIN_HEARTBEAT_INTERVAL_MS}"
            )));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "heartbeatTimeoutMs must not be shorter than heartbeatIntervalMs".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address; must be loopback.
    pub host: String,
    /// Bind port (`0` picks an ephemeral port).
    pub port: u16,
    /// Maximum simultaneous WebSocket clients.
    pub max_connections: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per client before sends are dropped.
    pub send_queue_capacity: usize,
    /// Interval between server pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a client is dropped, in milliseconds.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_connections: 32,
            max_message_size: 4 * 1024 * 1024,
            send_queue_capacity: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
        }
    }
}

/// Request lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestSettings {
    /// How long a request may stay active without a response.
    pub timeout_ms: u64,
}

impl RequestSettings {
    /// The timeout window as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self { timeout_ms: 300_000 }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` overrides).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
