//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only needs
//! to name the values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterconnectSettings {
    /// Session protocol settings.
    pub session: SessionSettings,
    /// Client-side call batching settings.
    pub batch: BatchSettings,
    /// Bundled server settings.
    pub server: ServerSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Session Manager settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Default per-request reply timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Request IDs issued before the root identifier is regenerated.
    pub id_rollover: u64,
}

impl SessionSettings {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            id_rollover: 1_000_000,
        }
    }
}

/// Call Multiplexer and retry settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchSettings {
    /// Debounce window in milliseconds (0 flushes on the next scheduler tick).
    pub debounce_ms: u64,
    /// Attempts per logical call, including the first.
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n * backoffStepMs`.
    pub backoff_step_ms: u64,
    /// Timeout of one physical batch HTTP request in milliseconds.
    pub http_timeout_ms: u64,
}

impl BatchSettings {
    /// Debounce window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Backoff step as a [`Duration`].
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    /// HTTP timeout as a [`Duration`].
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 0,
            max_attempts: 3,
            backoff_step_ms: 1_000,
            http_timeout_ms: 30_000,
        }
    }
}

/// Network settings for `interconnect serve`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port of the HTTP batch endpoint.
    pub http_port: u16,
    /// Port of the WebSocket interconnect listener.
    pub ws_port: u16,
    /// Path of the batch endpoint.
    pub rpc_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            http_port: 8787,
            ws_port: 8788,
            rpc_path: "/rpc".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(InterconnectSettings::default()).unwrap();
        assert_eq!(v["session"]["requestTimeoutMs"], 10_000);
        assert_eq!(v["batch"]["backoffStepMs"], 1_000);
        assert_eq!(v["server"]["wsPort"], 8788);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: InterconnectSettings =
            serde_json::from_str(r#"{"batch": {"debounceMs": 10}}"#).unwrap();
        assert_eq!(settings.batch.debounce_ms, 10);
        assert_eq!(settings.batch.max_attempts, 3);
        assert_eq!(settings.session.request_timeout_ms, 10_000);
    }

    #[test]
    fn duration_helpers() {
        let batch = BatchSettings::default();
        assert_eq!(batch.debounce(), Duration::ZERO);
        assert_eq!(batch.backoff_step(), Duration::from_secs(1));
        assert_eq!(
            SessionSettings::default().request_timeout(),
            Duration::from_secs(10)
        );
    }
}
