//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level error for ClinView
#[derive(Error, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum ClinViewError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("FHIR server error: {0}")]
    Fhir(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for ClinView operations
pub type Result<T> = std::result::Result<T, ClinViewError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the tagged JSON shape used when errors cross a UI boundary.
    #[test]
    fn test_error_serializes_tagged() {
        let err = ClinViewError::Config("missing base url".to_string());
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["type"], "Config");
        assert_eq!(json["message"], "missing base url");
        assert_eq!(err.to_string(), "Configuration error: missing base url");
    }

    #[test]
    fn test_error_round_trips_through_json() {
        let err = ClinViewError::Network("connection refused".to_string());
        let json = serde_json::to_string(&err).expect("serialize");
        let back: ClinViewError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, err);

        let unknown = r#"{"type":"Internal","message":"x"}"#;
        assert!(serde_json::from_str::<ClinViewError>(unknown).is_err());
    }
}
