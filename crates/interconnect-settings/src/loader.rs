//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::InterconnectSettings;

/// Resolve the settings file path.
///
/// `INTERCONNECT_SETTINGS` wins; otherwise `~/.interconnect/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string("INTERCONNECT_SETTINGS") {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".interconnect")
        .join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<InterconnectSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<InterconnectSettings> {
    let defaults = serde_json::to_value(InterconnectSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: InterconnectSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
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

fn validate(settings: &InterconnectSettings) -> Result<()> {
    if settings.batch.max_attempts == 0 {
        return Err(SettingsError::InvalidValue(
            "batch.maxAttempts must be at least 1".into(),
        ));
    }
    if settings.session.request_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "session.requestTimeoutMs must be positive".into(),
        ));
    }
    if !settings.server.rpc_path.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "server.rpcPath must start with '/': {}",
            settings.server.rpc_path
        )));
    }
    Ok(())
}

/// Apply `INTERCONNECT_*` environment overrides.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut InterconnectSettings) {
    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("INTERCONNECT_REQUEST_TIMEOUT_MS", 1, 3_600_000) {
        settings.session.request_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("INTERCONNECT_ID_ROLLOVER", 1, u64::MAX) {
        settings.session.id_rollover = v;
    }

    // ── Batch ───────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("INTERCONNECT_DEBOUNCE_MS", 0, 60_000) {
        settings.batch.debounce_ms = v;
    }
    if let Some(v) = read_env_u64("INTERCONNECT_MAX_ATTEMPTS", 1, 20) {
        // range-checked above
        #[allow(clippy::cast_possible_truncation)]
        let attempts = v as u32;
        settings.batch.max_attempts = attempts;
    }
    if let Some(v) = read_env_u64("INTERCONNECT_BACKOFF_STEP_MS", 0, 600_000) {
        settings.batch.backoff_step_ms = v;
    }
    if let Some(v) = read_env_u64("INTERCONNECT_HTTP_TIMEOUT_MS", 1, 3_600_000) {
        settings.batch.http_timeout_ms = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("INTERCONNECT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("INTERCONNECT_HTTP_PORT", 1, 65535) {
        settings.server.http_port = v;
    }
    if let Some(v) = read_env_u16("INTERCONNECT_WS_PORT", 1, 65535) {
        settings.server.ws_port = v;
    }
    if let Some(v) = read_env_string("INTERCONNECT_RPC_PATH") {
        settings.server.rpc_path = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("INTERCONNECT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("INTERCONNECT_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean (`true`/`1`/`yes`/`on`, `false`/`0`/`no`/`off`).
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

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = json!({"batch": {"debounceMs": 0, "maxAttempts": 3}});
        let source = json!({"batch": {"debounceMs": 10}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["batch"]["debounceMs"], 10);
        assert_eq!(merged["batch"]["maxAttempts"], 3);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(json!({"items": [1, 2, 3]}), json!({"items": [4]}));
        assert_eq!(merged["items"], json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({"a": {"nested": true}}), json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.http_port, 8787);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"session": {{"requestTimeoutMs": 2500}}, "server": {{"rpcPath": "/batch"}}}}"#
        )
        .unwrap();
        let settings = load_settings_from_path(file.path()).unwrap();
        assert_eq!(settings.session.request_timeout_ms, 2500);
        assert_eq!(settings.session.id_rollover, 1_000_000);
        assert_eq!(settings.server.rpc_path, "/batch");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn wrong_type_is_a_schema_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"httpPort": "eighty"}}}}"#).unwrap();
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Schema(_)));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"batch": {{"maxAttempts": 0}}}}"#).unwrap();
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn relative_rpc_path_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"rpcPath": "rpc"}}}}"#).unwrap();
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("rpcPath"));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("10", 0, 60_000), Some(10));
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }
}
