//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `CONDUIT_*` environment variable overrides
//! 4. Run [`GatewaySettings::validate`]

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{CacheBackend, GatewaySettings, LogFormat};

/// Resolve the default settings path (`~/.conduit/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".conduit").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    let _ = settings.validate();
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key; arrays and primitives in `source` replace the
/// target; `null` in `source` keeps the target value.
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

/// Apply `CONDUIT_*` environment overrides.
///
/// Values that fail to parse or fall outside their range are ignored with a
/// warning.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

fn apply_overrides_from(settings: &mut GatewaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Node ────────────────────────────────────────────────────────
    if let Some(v) = env.string("CONDUIT_BROKER_ID") {
        settings.node.broker_id = Some(v);
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("CONDUIT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("CONDUIT_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("CONDUIT_WS_PATH") {
        settings.server.ws_path = v;
    }
    if let Some(v) = env.u64("CONDUIT_PING_INTERVAL_SECS", 1, 3_600) {
        settings.server.ping_interval_secs = v;
    }
    if let Some(v) = env.u64("CONDUIT_PONG_TIMEOUT_SECS", 1, 7_200) {
        settings.server.pong_timeout_secs = v;
    }

    // ── Auth / security ─────────────────────────────────────────────
    if let Some(v) = env.string("CONDUIT_OAUTH_URL") {
        settings.auth.oauth_url = v;
    }
    if let Some(v) = env.u64("CONDUIT_AUTH_TIMEOUT_MS", 100, 120_000) {
        settings.auth.request_timeout_ms = v;
    }
    if let Some(v) = env.string("CONDUIT_SECRET_KEY") {
        settings.security.secret_key = Some(v);
    }

    // ── Cache ───────────────────────────────────────────────────────
    if let Some(v) = env.string("CONDUIT_CACHE_BACKEND") {
        match parse_backend(&v) {
            Some(backend) => settings.cache.backend = backend,
            None => tracing::warn!(key = "CONDUIT_CACHE_BACKEND", value = %v, "unknown cache backend, ignoring"),
        }
    }
    if let Some(v) = env.string("CONDUIT_REDIS_URL") {
        settings.cache.redis_url = v;
    }
    if let Some(v) = env.string("CONDUIT_KEY_PREFIX") {
        settings.cache.key_prefix = v;
    }
    if let Some(v) = env.u64("CONDUIT_CACHE_TTL_SECS", 10, 86_400) {
        settings.cache.entry_ttl_secs = v;
    }
    if let Some(v) = env.u64("CONDUIT_RECONCILE_INTERVAL_SECS", 1, 3_600) {
        settings.cache.reconcile_interval_secs = v;
    }

    // ── Registration / dispatch ─────────────────────────────────────
    if let Some(v) = env.u64("CONDUIT_LOCK_TIMEOUT_MS", 1, 600_000) {
        settings.registration.lock_timeout_ms = v;
    }
    if let Some(v) = env.string("CONDUIT_HEARTBEAT") {
        settings.dispatch.heartbeat = v;
    }
    if let Some(v) = env.u64("CONDUIT_PROCESSOR_TIMEOUT_MS", 1, 600_000) {
        settings.dispatch.processor_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("CONDUIT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("CONDUIT_LOG_JSON") {
        settings.logging.format = if v { LogFormat::Json } else { LogFormat::Compact };
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a cache backend name.
pub fn parse_backend(val: &str) -> Option<CacheBackend> {
    match val.to_lowercase().as_str() {
        "memory" => Some(CacheBackend::Memory),
        "redis" => Some(CacheBackend::Redis),
        _ => None,
    }
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
