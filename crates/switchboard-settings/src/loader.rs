//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SwitchboardSettings::default()`]
//! 2. If `~/.switchboard/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{BrokerKind, SwitchboardSettings};

/// Resolve the path to the settings file (`~/.switchboard/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchboard").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SwitchboardSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error. The merged
/// result is validated before it is returned.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchboardSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<SwitchboardSettings> {
    let defaults = serde_json::to_value(SwitchboardSettings::default())?;

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

/// Apply `SWITCHBOARD_*` environment overrides from the process environment.
pub fn apply_env_overrides(settings: &mut SwitchboardSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Strict parsing: integers must parse and fall within range, booleans
/// accept `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values
/// are ignored with a warning.
pub fn apply_overrides_from<F>(settings: &mut SwitchboardSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SWITCHBOARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_PORT", 1, 65_535) {
        #[allow(clippy::cast_possible_truncation)]
        {
            settings.server.port = v as u16;
        }
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_KEEP_ALIVE_SECS", 1, 3_600) {
        settings.server.keep_alive_secs = v;
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.u64_in("SWITCHBOARD_RESPONSE_TIMEOUT_MS", 100, 600_000) {
        settings.relay.response_timeout_ms = v;
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_SESSION_TTL_SECS", 1, 86_400) {
        settings.relay.session_ttl_secs = v;
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_MAX_DURATION_SECS", 1, 86_400) {
        settings.relay.platform_max_duration_secs = v;
    }
    if let Some(v) = env.bool("SWITCHBOARD_SERIALIZE_HANDLERS") {
        settings.relay.serialize_handlers = v;
    }

    // ── Broker ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SWITCHBOARD_BROKER") {
        match v.to_ascii_lowercase().as_str() {
            "memory" => settings.broker.kind = BrokerKind::Memory,
            "redis" => settings.broker.kind = BrokerKind::Redis,
            _ => tracing::warn!(key = "SWITCHBOARD_BROKER", value = %v, "unknown broker kind, ignoring"),
        }
    }
    if let Some(v) = env
        .string("SWITCHBOARD_REDIS_URL")
        .or_else(|| env.string("REDIS_URL"))
    {
        settings.broker.url = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SWITCHBOARD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("SWITCHBOARD_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
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

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"relay": {"responseTimeoutMs": 10000, "sessionTtlSecs": 1800}});
        let source = serde_json::json!({"relay": {"responseTimeoutMs": 5000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["relay"]["responseTimeoutMs"], 5000);
        assert_eq!(merged["relay"]["sessionTtlSecs"], 1800);
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
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.broker.kind, BrokerKind::Memory);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"broker": {"kind": "redis", "url": "redis://cache:6379"}, "relay": {"serializeHandlers": true}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.broker.kind, BrokerKind::Redis);
        assert_eq!(settings.broker.url, "redis://cache:6379");
        assert!(settings.relay.serialize_handlers);
        assert_eq!(settings.relay.response_timeout_ms, 10_000);
        assert_eq!(settings.broker.backoff.max_delay_ms, 5_000);
    }

    #[test]
    fn invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert_matches!(load_file_layer(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_combination_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"relay": {"platformMaxDurationSecs": 3, "terminationMarginSecs": 5}}"#,
        )
        .unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = SwitchboardSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("SWITCHBOARD_PORT", "8088"),
                ("SWITCHBOARD_BROKER", "Redis"),
                ("SWITCHBOARD_REDIS_URL", "redis://a:6379"),
                ("SWITCHBOARD_RESPONSE_TIMEOUT_MS", "2500"),
                ("SWITCHBOARD_SERIALIZE_HANDLERS", "yes"),
                ("SWITCHBOARD_LOG_JSON", "on"),
            ]),
        );
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.broker.kind, BrokerKind::Redis);
        assert_eq!(settings.broker.url, "redis://a:6379");
        assert_eq!(settings.relay.response_timeout_ms, 2500);
        assert!(settings.relay.serialize_handlers);
        assert!(settings.logging.json);
    }

    #[test]
    fn redis_url_fallback() {
        let mut settings = SwitchboardSettings::default();
        apply_overrides_from(&mut settings, env(&[("REDIS_URL", "redis://fallback:6379")]));
        assert_eq!(settings.broker.url, "redis://fallback:6379");

        let mut settings = SwitchboardSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("REDIS_URL", "redis://fallback:6379"),
                ("SWITCHBOARD_REDIS_URL", "redis://primary:6379"),
            ]),
        );
        assert_eq!(settings.broker.url, "redis://primary:6379");
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = SwitchboardSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("SWITCHBOARD_PORT", "0"),
                ("SWITCHBOARD_RESPONSE_TIMEOUT_MS", "ten"),
                ("SWITCHBOARD_SERIALIZE_HANDLERS", "maybe"),
                ("SWITCHBOARD_BROKER", "kafka"),
                ("SWITCHBOARD_HOST", ""),
            ]),
        );
        let defaults = SwitchboardSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.server.host, defaults.server.host);
        assert_eq!(settings.relay.response_timeout_ms, 10_000);
        assert!(!settings.relay.serialize_handlers);
        assert_eq!(settings.broker.kind, BrokerKind::Memory);
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 1, 10), None);
    }
}
