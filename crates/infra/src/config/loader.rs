//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `CLINVIEW_FHIR_BASE_URL` is missing, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `CLINVIEW_FHIR_BASE_URL`: FHIR server base URL (required)
//! - `CLINVIEW_ORGANIZATION_ID`: Organization scoping patient searches
//! - `CLINVIEW_TIMEOUT_MS`: Per-request timeout in milliseconds
//! - `CLINVIEW_ENABLE_RETRY`: Whether retry is enabled (true/false)
//! - `CLINVIEW_ENABLE_CIRCUIT_BREAKER`: Whether the breaker is enabled
//! - `CLINVIEW_ENABLE_OFFLINE`: Whether offline caching is enabled
//! - `CLINVIEW_STORAGE_PATH`: JSON file backing the offline store
//! - `CLINVIEW_HEALTH_ENDPOINT`: URL probed by the connectivity monitor
//! - `CLINVIEW_POLL_INTERVAL_MS`: Connectivity poll interval (0 disables)
//! - `CLINVIEW_LOG_LEVEL`: Default tracing filter
//! - `CLINVIEW_LOG_JSON`: Emit JSON logs (true/false)
//!
//! Retry and breaker tuning are only read from files.
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./clinview.json` or `./clinview.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. `../clinview.json` or `../clinview.toml` (parent directory)
//! 4. Relative to executable location

use std::path::{Path, PathBuf};

use clinview_domain::{
    ClinViewError, Config, FhirConfig, LoggingConfig, OfflineConfig, ResilienceConfig, Result,
};

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If the base URL is
/// missing or a value is invalid, falls back to loading from a config file.
///
/// # Errors
/// Returns `ClinViewError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - Required fields are missing
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `ClinViewError::Config` if `CLINVIEW_FHIR_BASE_URL` is missing
/// or a numeric variable does not parse.
pub fn load_from_env() -> Result<Config> {
    let base_url = env_var("CLINVIEW_FHIR_BASE_URL")?;

    let mut fhir = FhirConfig::new(base_url);
    fhir.organization_id = env_opt("CLINVIEW_ORGANIZATION_ID");
    if let Some(timeout_ms) = env_u64("CLINVIEW_TIMEOUT_MS")? {
        fhir.timeout_ms = timeout_ms;
    }

    let resilience = ResilienceConfig {
        enable_retry: env_bool("CLINVIEW_ENABLE_RETRY", true),
        enable_circuit_breaker: env_bool("CLINVIEW_ENABLE_CIRCUIT_BREAKER", true),
        ..ResilienceConfig::default()
    };

    let mut offline = OfflineConfig {
        enabled: env_bool("CLINVIEW_ENABLE_OFFLINE", true),
        storage_path: env_opt("CLINVIEW_STORAGE_PATH"),
        health_endpoint: env_opt("CLINVIEW_HEALTH_ENDPOINT"),
        ..OfflineConfig::default()
    };
    if let Some(interval_ms) = env_u64("CLINVIEW_POLL_INTERVAL_MS")? {
        offline.poll_interval_ms = interval_ms;
    }

    let mut logging = LoggingConfig { json: env_bool("CLINVIEW_LOG_JSON", false), ..Default::default() };
    if let Some(level) = env_opt("CLINVIEW_LOG_LEVEL") {
        logging.level = level;
    }

    Ok(Config { fhir, resilience, offline, logging })
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `ClinViewError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - Required fields are missing
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ClinViewError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            ClinViewError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| ClinViewError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ClinViewError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ClinViewError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(ClinViewError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    const NAMES: [&str; 4] = ["clinview.json", "clinview.toml", "config.json", "config.toml"];

    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(NAMES.iter().map(|name| cwd.join(name)));
        candidates.push(cwd.join("../clinview.json"));
        candidates.push(cwd.join("../clinview.toml"));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(NAMES.iter().map(|name| exe_dir.join(name)));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Get required environment variable
///
/// # Errors
/// Returns `ClinViewError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        ClinViewError::Config(format!("Missing required environment variable: {}", key))
    })
}

/// Optional, non-empty environment variable
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Optional numeric environment variable
fn env_u64(key: &str) -> Result<Option<u64>> {
    env_opt(key)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|e| ClinViewError::Config(format!("Invalid value for {}: {}", key, e)))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
