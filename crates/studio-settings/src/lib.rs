//! # studio-settings
//!
//! Configuration for the studio coordinator, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`StudioSettings::default()`]
//! 2. **User file**: `~/.studio/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `STUDIO_*` overrides (highest priority)
//!
//! There is no global settings instance: the caller loads a value once and
//! passes it to the server.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = StudioSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = StudioSettings::default();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.requests.timeout_ms, 300_000);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.validate().is_ok());
    }
}
