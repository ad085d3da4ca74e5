//! # Controller Configuration
//!
//! Process-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_API_CALL_TIMEOUT_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS,
    DEFAULT_CERT_RELOAD_DEBOUNCE_MS, DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_METRICS_PORT,
    DEFAULT_WEBHOOK_PORT,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Port of the plain HTTP server serving metrics and probes
    pub metrics_port: u16,
    /// Port of the HTTPS admission webhook server
    pub webhook_port: u16,
    /// Upper bound for every outbound Kubernetes API call (milliseconds)
    pub api_call_timeout_ms: u64,
    /// Maximum concurrent reconciliations
    pub max_concurrent_reconciliations: usize,
    /// Per-item error requeue backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Per-item error requeue backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Quiet period used to coalesce certificate directory events (milliseconds)
    pub cert_reload_debounce_ms: u64,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            webhook_port: DEFAULT_WEBHOOK_PORT,
            api_call_timeout_ms: DEFAULT_API_CALL_TIMEOUT_MS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            cert_reload_debounce_ms: DEFAULT_CERT_RELOAD_DEBOUNCE_MS,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup (environment, ConfigMap data, tests)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            webhook_port: parse_or(&lookup, "WEBHOOK_PORT", defaults.webhook_port),
            api_call_timeout_ms: parse_or(
                &lookup,
                "API_CALL_TIMEOUT_MS",
                defaults.api_call_timeout_ms,
            ),
            max_concurrent_reconciliations: parse_or(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            )
            .max(1),
            backoff_start_ms: parse_or(&lookup, "BACKOFF_START_MS", defaults.backoff_start_ms),
            backoff_max_ms: parse_or(&lookup, "BACKOFF_MAX_MS", defaults.backoff_max_ms),
            cert_reload_debounce_ms: parse_or(
                &lookup,
                "CERT_RELOAD_DEBOUNCE_MS",
                defaults.cert_reload_debounce_ms,
            ),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    #[must_use]
    pub fn api_call_timeout(&self) -> Duration {
        Duration::from_millis(self.api_call_timeout_ms)
    }

    #[must_use]
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    #[must_use]
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub fn cert_reload_debounce(&self) -> Duration {
        Duration::from_millis(self.cert_reload_debounce_ms)
    }

    #[must_use]
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Read a key and parse it, falling back to `default` when unset or unparsable
fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
