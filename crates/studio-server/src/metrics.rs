//! Metric names recorded through the `metrics` facade.
//!
//! No recorder is installed here; an embedding host may install one.

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connections refused total (counter, labels: reason).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Outbound frames dropped for slow or dead clients (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Studio requests accepted total (counter, labels: kind).
pub const STUDIO_REQUESTS_TOTAL: &str = "studio_requests_total";
/// Studio request outcomes (counter, labels: outcome).
pub const STUDIO_REQUEST_OUTCOMES_TOTAL: &str = "studio_request_outcomes_total";
/// Studio request duration seconds (histogram, labels: outcome).
pub const STUDIO_REQUEST_DURATION_SECONDS: &str = "studio_request_duration_seconds";
/// Session token rotations total (counter).
pub const STUDIO_TOKEN_ROTATIONS_TOTAL: &str = "studio_token_rotations_total";
