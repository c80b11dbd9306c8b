//! Client configuration with file and environment layering.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientConfig::default()`]
//! 2. If `~/.orchflow/client.json` exists, deep-merge its values over defaults
//! 3. Apply `ORCHFLOW_*` environment overrides (highest priority)
//!
//! Command-line flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ConfigError;

/// Connection and engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the orchestrator.
    pub url: String,
    /// Handshake deadline.
    pub connect_timeout_ms: u64,
    /// Capacity of the outbound frame queue.
    pub outbound_buffer: usize,
    /// Per-call deadline. `None` waits for as long as the connection lives.
    pub call_timeout_ms: Option<u64>,
    /// Default `tracing` filter for the binary.
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:7777".to_owned(),
            connect_timeout_ms: 5_000,
            outbound_buffer: 64,
            call_timeout_ms: None,
            log_level: "warn".to_owned(),
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Handshake deadline as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-call deadline as a [`Duration`].
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Resolve the path to the config file (`~/.orchflow/client.json`).
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
    PathBuf::from(home).join(".orchflow").join("client.json")
}

/// Load configuration from the default path with env var overrides.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(&config_path())
}

/// Load configuration from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_config_from_path(path: &Path) -> Result<ClientConfig, ConfigError> {
    let mut config = load_file_layer(path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

fn load_file_layer(path: &Path) -> Result<ClientConfig, ConfigError> {
    let defaults = serde_json::to_value(ClientConfig::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading client config");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "client config not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key; arrays and primitives are replaced; `null` in
/// `source` keeps the `target` value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ORCHFLOW_*` environment overrides.
pub fn apply_env_overrides(config: &mut ClientConfig) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are logged and ignored.
pub fn apply_overrides<F>(config: &mut ClientConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("ORCHFLOW_URL") {
        if is_ws_url(&v) {
            config.url = v;
        } else {
            warn!(key = "ORCHFLOW_URL", value = %v, "not a ws:// or wss:// url, ignoring");
        }
    }
    if let Some(v) = read("ORCHFLOW_CONNECT_TIMEOUT_MS") {
        match parse_u64_range(&v, 1, 600_000) {
            Some(n) => config.connect_timeout_ms = n,
            None => invalid("ORCHFLOW_CONNECT_TIMEOUT_MS", &v),
        }
    }
    if let Some(v) = read("ORCHFLOW_OUTBOUND_BUFFER") {
        match parse_usize_range(&v, 1, 65_536) {
            Some(n) => config.outbound_buffer = n,
            None => invalid("ORCHFLOW_OUTBOUND_BUFFER", &v),
        }
    }
    if let Some(v) = read("ORCHFLOW_CALL_TIMEOUT_MS") {
        match parse_optional_ms(&v) {
            Some(ms) => config.call_timeout_ms = ms,
            None => invalid("ORCHFLOW_CALL_TIMEOUT_MS", &v),
        }
    }
    if let Some(v) = read("ORCHFLOW_LOG_LEVEL") {
        config.log_level = v;
    }
}

fn invalid(key: &str, value: &str) {
    warn!(key, value, "invalid env var, ignoring");
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Whether `url` uses a WebSocket scheme.
pub fn is_ws_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a millisecond deadline where `0`/`none`/`off` disables it.
///
/// Returns `None` for unparseable input, `Some(None)` for "disabled".
pub fn parse_optional_ms(val: &str) -> Option<Option<u64>> {
    match val.trim().to_lowercase().as_str() {
        "0" | "none" | "off" => Some(None),
        other => parse_u64_range(other, 1, 86_400_000).map(Some),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
