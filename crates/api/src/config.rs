//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::SagaOptions;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `SAGA_STEP_TIMEOUT_MS`: bound on one step attempt (default: `5000`)
/// - `SAGA_RETRY_INITIAL_MS`: first retry backoff (default: `1000`)
/// - `SAGA_RETRY_MULTIPLIER`: backoff growth factor (default: `2.0`)
/// - `SAGA_RETRY_MAX_MS`: backoff cap (default: `30000`)
/// - `SAGA_RETRY_MAX_ATTEMPTS`: forward step attempt bound (default: unbounded)
/// - `SAGA_COMPENSATION_MAX_ATTEMPTS`: undo attempt bound (default: `5`)
/// - `SAGA_CHECKPOINT_PAUSES`: `on`/`off` pauses after progress checkpoints (default: `on`)
/// - `SAGA_FAN_OUT_LIMIT`: concurrent shipping children (default: unbounded)
///
/// Unparsable values are ignored in favour of the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Options recorded for every execution started by this process.
    pub saga: SagaOptions,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut saga = defaults.saga;

        if let Some(ms) = parsed(&lookup, "SAGA_STEP_TIMEOUT_MS") {
            saga.step_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed(&lookup, "SAGA_RETRY_INITIAL_MS") {
            saga.retry.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(multiplier) = parsed::<f64>(&lookup, "SAGA_RETRY_MULTIPLIER")
            && multiplier >= 1.0
        {
            saga.retry.backoff_multiplier = multiplier;
        }
        if let Some(ms) = parsed(&lookup, "SAGA_RETRY_MAX_MS") {
            saga.retry.max_backoff = Duration::from_millis(ms);
        }
        if let Some(max) = parsed::<u32>(&lookup, "SAGA_RETRY_MAX_ATTEMPTS")
            && max > 0
        {
            saga.retry.max_attempts = Some(max);
        }
        if let Some(max) = parsed::<u32>(&lookup, "SAGA_COMPENSATION_MAX_ATTEMPTS")
            && max > 0
        {
            saga.compensation_retry.max_attempts = Some(max);
        }
        if let Some(pauses) = lookup("SAGA_CHECKPOINT_PAUSES").and_then(|v| switch(&v)) {
            saga.checkpoint_pauses = pauses;
        }
        if let Some(limit) = parsed::<usize>(&lookup, "SAGA_FAN_OUT_LIMIT")
            && limit > 0
        {
            saga.fan_out_limit = Some(limit);
        }

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            saga,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            saga: SagaOptions::default(),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

fn switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Some(true),
        "off" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
