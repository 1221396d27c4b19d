//! Configuration structures
//!
//! Deserialized from JSON or TOML by the infra config loader, or assembled
//! from `CLINVIEW_*` environment variables. Every section except `fhir` has
//! defaults, so a file only needs `fhir.base_url` to be valid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CAPABILITY_STATEMENT_PATH, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PROBE_TIMEOUT_MS,
    DEFAULT_REQUEST_TIMEOUT_MS,
};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub fhir: FhirConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Configuration with defaults for everything but the server URL
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            fhir: FhirConfig::new(base_url),
            resilience: ResilienceConfig::default(),
            offline: OfflineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Health endpoint the connectivity monitor probes
    pub fn health_endpoint(&self) -> String {
        self.offline.health_endpoint.clone().unwrap_or_else(|| {
            format!("{}/{}", self.fhir.base_url.trim_end_matches('/'), CAPABILITY_STATEMENT_PATH)
        })
    }
}

/// FHIR server connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FhirConfig {
    pub base_url: String,
    /// Scopes patient searches to this organization when set
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl FhirConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            organization_id: None,
            headers: BTreeMap::new(),
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Retry and circuit breaker switches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResilienceConfig {
    #[serde(default = "default_true")]
    pub enable_retry: bool,
    #[serde(default = "default_true")]
    pub enable_circuit_breaker: bool,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            enable_retry: true,
            enable_circuit_breaker: true,
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

/// Backoff parameters in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 1000, max_delay_ms: 10_000, backoff_factor: 2.0 }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout_ms: 60_000 }
    }
}

/// Offline cache, queue and connectivity monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OfflineConfig {
    pub enabled: bool,
    /// JSON file backing the offline store; in-memory when unset
    pub storage_path: Option<String>,
    /// Defaults to `<base_url>/metadata`
    pub health_endpoint: Option<String>,
    /// Zero disables polling
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_path: None,
            health_endpoint: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal document only needs the server URL.
    #[test]
    fn test_minimal_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"fhir":{"base_url":"https://fhir.example.org/r4/"}}"#)
                .expect("parse");

        assert_eq!(config.fhir.timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert!(config.resilience.enable_retry);
        assert!(config.resilience.enable_circuit_breaker);
        assert_eq!(config.resilience.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.resilience.retry.max_attempts, 3);
        assert!(config.offline.enabled);
        assert_eq!(config.offline.poll_interval_ms, 30_000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.health_endpoint(), "https://fhir.example.org/r4/metadata");
    }

    /// Partial sections keep defaults for omitted fields.
    #[test]
    fn test_partial_sections() {
        let config: Config = serde_json::from_str(
            r#"{
                "fhir": {"base_url": "http://localhost:8080/fhir", "organization_id": "org-1"},
                "resilience": {"enable_retry": false, "circuit_breaker": {"failure_threshold": 2}},
                "offline": {"health_endpoint": "http://localhost:8080/health"}
            }"#,
        )
        .expect("parse");

        assert!(!config.resilience.enable_retry);
        assert!(config.resilience.enable_circuit_breaker);
        assert_eq!(config.resilience.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.resilience.circuit_breaker.recovery_timeout_ms, 60_000);
        assert_eq!(config.fhir.organization_id.as_deref(), Some("org-1"));
        assert_eq!(config.health_endpoint(), "http://localhost:8080/health");
    }
}
