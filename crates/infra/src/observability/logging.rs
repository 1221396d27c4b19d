use clinview_domain::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Subscriber installation failures
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter {directive:?}: {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("Tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Filter from `RUST_LOG`, falling back to the configured level
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|err| LoggingError::InvalidFilter {
            directive: config.level.clone(),
            message: err.to_string(),
        }),
    }
}

/// Install the global subscriber: plain or JSON lines on stderr.
///
/// # Errors
///
/// Fails when the configured level is not a valid filter directive or a
/// global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false).with_writer(std::io::stderr)).try_init()
    };

    result.map_err(|err| LoggingError::AlreadyInstalled(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig { level: "clinview=loud".to_string(), json: false };
        assert!(matches!(build_filter(&config), Err(LoggingError::InvalidFilter { .. })));
    }

    #[test]
    fn test_second_install_fails() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(LoggingError::AlreadyInstalled(_))));
    }
}
