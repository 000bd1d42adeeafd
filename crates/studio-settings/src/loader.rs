//! Reading [`StudioSettings`] from disk and the environment.
//!
//! The user file is merged over the compiled defaults as JSON before it is
//! deserialized, so a file only needs the keys it changes. Objects merge
//! key by key, `null` leaves the default alone, and anything else replaces
//! the default outright. `STUDIO_*` variables are applied last, then the
//! result is validated.

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{MIN_HEARTBEAT_INTERVAL_MS, MIN_REQUEST_TIMEOUT_MS, StudioSettings};

/// `~/.studio/settings.json`, or under the temp dir when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join(".studio")
        .join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StudioSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus env overrides). If the
/// file contains invalid JSON or the merged result fails validation, returns
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<StudioSettings> {
    let defaults = serde_json::to_value(StudioSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: StudioSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `STUDIO_*` environment variable overrides.
///
/// Numbers outside their range and unknown log formats are ignored with a
/// warning; the file or default value stays in effect.
pub fn apply_env_overrides(settings: &mut StudioSettings) {
    if let Some(port) = env_in_range("STUDIO_PORT", 0..=u16::MAX) {
        settings.server.port = port;
    }
    if let Some(max) = env_in_range("STUDIO_MAX_CONNECTIONS", 1..=1_000) {
        settings.server.max_connections = max;
    }
    if let Some(ms) = env_in_range(
        "STUDIO_REQUEST_TIMEOUT_MS",
        MIN_REQUEST_TIMEOUT_MS..=3_600_000,
    ) {
        settings.requests.timeout_ms = ms;
    }
    if let Some(ms) = env_in_range(
        "STUDIO_HEARTBEAT_INTERVAL_MS",
        MIN_HEARTBEAT_INTERVAL_MS..=600_000,
    ) {
        settings.server.heartbeat_interval_ms = ms;
        // a client gets at least two missed pings before it is dropped
        settings.server.heartbeat_timeout_ms = settings.server.heartbeat_timeout_ms.max(ms * 2);
    }
    if let Some(level) = env_string("STUDIO_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(raw) = env_string("STUDIO_LOG_FORMAT") {
        match serde_json::from_value(Value::String(raw.clone())) {
            Ok(format) => settings.logging.format = format,
            Err(_) => warn!(key = "STUDIO_LOG_FORMAT", value = %raw, "unknown log format, ignoring"),
        }
    }
}

/// Parse `raw` as a number inside `range`.
pub fn parse_in_range<T>(raw: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim().parse().ok().filter(|n| range.contains(n))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_in_range<T>(name: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd + Display + Clone,
{
    let raw = std::env::var(name).ok()?;
    let parsed = parse_in_range(&raw, range.clone());
    if parsed.is_none() {
        warn!(
            key = name,
            value = %raw,
            min = %range.start(),
            max = %range.end(),
            "env override out of range, ignoring"
        );
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 0, "host": "127.0.0.1"}
        });
        let source = serde_json::json!({
            "server": {"port": 9090}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.max_connections, 32);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"requests": {"timeoutMs": 60000}, "logging": {"format": "json"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.requests.timeout_ms, 60_000);
        assert_eq!(settings.logging.format, studio_core::logging::LogFormat::Json);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.server.send_queue_capacity, 256);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_public_bind_address() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"host": "0.0.0.0"}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn load_rejects_zero_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"heartbeatIntervalMs": 0, "heartbeatTimeoutMs": 0}}"#,
        )
        .unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn load_rejects_sub_second_request_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"requests": {"timeoutMs": 10}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    // ── env parsing ─────────────────────────────────────────────────

    #[test]
    fn port_range_accepts_ephemeral_zero() {
        assert_eq!(parse_in_range("0", 0..=u16::MAX), Some(0));
        assert_eq!(parse_in_range::<u16>("99999", 0..=u16::MAX), None);
        assert_eq!(parse_in_range::<u16>("port", 0..=u16::MAX), None);
    }

    #[test]
    fn timeout_range_is_inclusive() {
        let range = 1_000_u64..=3_600_000;
        assert_eq!(parse_in_range("1000", range.clone()), Some(1_000));
        assert_eq!(parse_in_range(" 3600000 ", range.clone()), Some(3_600_000));
        assert_eq!(parse_in_range("999", range.clone()), None);
        assert_eq!(parse_in_range("3600001", range), None);
    }

    #[test]
    fn connection_cap_rejects_zero() {
        assert_eq!(parse_in_range("8", 1_usize..=1_000), Some(8));
        assert_eq!(parse_in_range("0", 1_usize..=1_000), None);
        assert_eq!(parse_in_range("-3", 1_usize..=1_000), None);
    }
}
