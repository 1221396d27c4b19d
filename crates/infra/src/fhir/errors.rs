//! FHIR client error types
//!
//! One error type covers every failure a FHIR call can produce, with an
//! HTTP-like status for uniform handling by callers:
//!
//! | Variant | `status()` | Retried by [`fhir_retry_condition`] |
//! |---------|-----------|--------------------------------------|
//! | `Http` 5xx, 429 | server status | yes |
//! | `Http` other 4xx | server status | no |
//! | `Timeout` | 408 | yes |
//! | `Network` | 0 | yes |
//! | `CircuitOpen` | 0 | no |
//! | `InvalidPayload`, `InvalidId`, `Config` | 0 | no |

use std::time::Duration;

use clinview_common::resilience::{default_retry_condition, ResilienceError, TransientError};
use clinview_domain::{ClinViewError, OperationOutcome, OperationOutcomeIssue};
use thiserror::Error;

use crate::http::HttpError;

/// FHIR operation errors
#[derive(Debug, Error)]
pub enum FhirError {
    /// Non-2xx response; `message` carries OperationOutcome diagnostics
    /// when the server sent any
    #[error("{message}")]
    Http { status: u16, message: String, issues: Vec<OperationOutcomeIssue> },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Invalid FHIR payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid resource id: {0:?}")]
    InvalidId(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for FHIR operations
pub type FhirResult<T> = Result<T, FhirError>;

impl FhirError {
    /// Build the error for a non-success response body
    pub fn from_response(status: u16, reason: Option<&str>, body: &str) -> Self {
        let outcome = OperationOutcome::from_body(body);
        let message = outcome
            .as_ref()
            .and_then(OperationOutcome::summary)
            .unwrap_or_else(|| match reason {
                Some(reason) => format!("HTTP {status}: {reason}"),
                None => format!("HTTP {status}"),
            });

        FhirError::Http {
            status,
            message,
            issues: outcome.map(|outcome| outcome.issue).unwrap_or_default(),
        }
    }

    /// HTTP-like status: the server status, 408 for timeouts, 0 otherwise
    pub fn status(&self) -> u16 {
        match self {
            FhirError::Http { status, .. } => *status,
            FhirError::Timeout(_) => 408,
            _ => 0,
        }
    }

    /// Issues from the server's OperationOutcome, if any
    pub fn issues(&self) -> &[OperationOutcomeIssue] {
        match self {
            FhirError::Http { issues, .. } => issues,
            _ => &[],
        }
    }

    /// Whether the failure means the server could not be reached
    pub fn is_network_related(&self) -> bool {
        matches!(self, FhirError::Network(_) | FhirError::Timeout(_))
    }

    /// Whether the server is unavailable to this client: unreachable, or
    /// shielded by an open circuit breaker
    pub fn is_unavailable(&self) -> bool {
        self.is_network_related() || matches!(self, FhirError::CircuitOpen)
    }

    /// Whether the FHIR retry policy would retry this error
    pub fn should_retry(&self) -> bool {
        fhir_retry_condition(self)
    }
}

impl TransientError for FhirError {
    fn status(&self) -> Option<u16> {
        Some(FhirError::status(self)).filter(|status| *status != 0)
    }

    fn kind(&self) -> &str {
        match self {
            FhirError::Http { .. } => "HttpError",
            FhirError::Timeout(_) => "TimeoutError",
            FhirError::Network(_) => "NetworkError",
            FhirError::CircuitOpen => "CircuitOpenError",
            FhirError::InvalidPayload(_) => "PayloadError",
            FhirError::InvalidId(_) => "InvalidIdError",
            FhirError::Config(_) => "ConfigError",
        }
    }
}

/// Retry classification for FHIR calls.
///
/// Responses are judged on status alone (5xx, 429); message heuristics
/// apply only to failures that never produced a response.
pub fn fhir_retry_condition(error: &FhirError) -> bool {
    match error {
        FhirError::Http { status, .. } => matches!(status, 429 | 500..=599),
        FhirError::Network(_) | FhirError::Timeout(_) => true,
        FhirError::CircuitOpen => false,
        FhirError::InvalidPayload(_) | FhirError::InvalidId(_) | FhirError::Config(_) => {
            default_retry_condition(error)
        }
    }
}

impl From<HttpError> for FhirError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout(timeout) => FhirError::Timeout(timeout),
            HttpError::Connect(message) | HttpError::Request(message) => {
                FhirError::Network(message)
            }
            HttpError::Build(message) => FhirError::Config(message),
        }
    }
}

impl From<ResilienceError<FhirError>> for FhirError {
    fn from(err: ResilienceError<FhirError>) -> Self {
        match err {
            ResilienceError::CircuitOpen => FhirError::CircuitOpen,
            ResilienceError::OperationFailed { source } => source,
        }
    }
}

impl From<serde_json::Error> for FhirError {
    fn from(err: serde_json::Error) -> Self {
        FhirError::InvalidPayload(err.to_string())
    }
}

impl From<FhirError> for ClinViewError {
    fn from(err: FhirError) -> Self {
        match err {
            FhirError::Network(_) | FhirError::Timeout(_) => ClinViewError::Network(err.to_string()),
            FhirError::Config(message) => ClinViewError::Config(message),
            FhirError::InvalidPayload(message) => ClinViewError::InvalidInput(message),
            FhirError::InvalidId(id) => ClinViewError::InvalidInput(format!("Invalid resource id: {id}")),
            other => ClinViewError::Fhir(other.to_string()),
        }
    }
}
