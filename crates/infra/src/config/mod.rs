//! Configuration loading and conversion
//!
//! Loads [`clinview_domain::Config`] from environment variables or files and
//! converts its plain settings into the resilience primitives' types.

pub mod loader;

use std::time::Duration;

use clinview_common::resilience::{CircuitBreakerConfig, RetryConfig};
use clinview_domain::{CircuitBreakerSettings, RetrySettings};

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, probe_config_paths};

/// Backoff parameters from millisecond settings
pub fn retry_config_from(settings: &RetrySettings) -> RetryConfig {
    RetryConfig {
        max_attempts: settings.max_attempts,
        base_delay: Duration::from_millis(settings.base_delay_ms),
        max_delay: Duration::from_millis(settings.max_delay_ms),
        backoff_factor: settings.backoff_factor,
    }
}

/// Breaker thresholds from millisecond settings; one half-open probe
pub fn breaker_config_from(settings: &CircuitBreakerSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: settings.failure_threshold,
        recovery_timeout: Duration::from_millis(settings.recovery_timeout_ms),
        ..CircuitBreakerConfig::default()
    }
}
