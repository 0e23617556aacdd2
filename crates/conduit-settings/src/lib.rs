//! # conduit-settings
//!
//! Layered configuration for a conduit gateway node.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: `~/.conduit/settings.json` or an explicit path, deep-merged over defaults
//! 3. **Environment variables**: `CONDUIT_*` overrides (highest priority)
//!
//! After loading, [`GatewaySettings::validate`] corrects values that would
//! break runtime invariants (zero timeouts, a cache TTL shorter than the
//! reconciliation interval) and logs a warning for each correction.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = GatewaySettings::default();
        assert!(settings.node.broker_id.is_none());
        assert_eq!(settings.server.port, 8260);
        assert_eq!(settings.server.ws_path, "/websocket");
        assert_eq!(settings.registration.lock_timeout_ms, 10_000);
        assert_eq!(settings.dispatch.heartbeat, "heartbeat");
        assert_eq!(settings.cache.backend, CacheBackend::Memory);
        assert!(settings.security.secret_key.is_none());
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn deep_merge_re_exported() {
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
