//! FHIR OperationOutcome for error responses

use serde::{Deserialize, Serialize};

/// Severity of the issue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

/// FHIR Coding
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// FHIR CodeableConcept
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// FHIR OperationOutcome resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issue: Vec<OperationOutcomeIssue>,
}

impl OperationOutcome {
    /// Outcome with a single error issue
    pub fn error(code: &str, diagnostics: &str) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: vec![OperationOutcomeIssue {
                severity: IssueSeverity::Error,
                code: code.to_string(),
                diagnostics: Some(diagnostics.to_string()),
                details: None,
                location: Vec::new(),
            }],
        }
    }

    /// Parse a response body, accepting it only if it really is an outcome
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str::<Self>(body)
            .ok()
            .filter(|outcome| outcome.resource_type == "OperationOutcome")
    }

    /// Human-readable text of every issue, joined with `"; "`.
    ///
    /// Uses `diagnostics`, falling back to `details.text`. Returns `None`
    /// when no issue carries any text.
    pub fn summary(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .issue
            .iter()
            .filter_map(|issue| {
                issue
                    .diagnostics
                    .as_deref()
                    .or_else(|| issue.details.as_ref().and_then(|d| d.text.as_deref()))
            })
            .filter(|text| !text.trim().is_empty())
            .collect();

        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

/// Individual issue in an OperationOutcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    /// Issue type code (`invalid`, `not-found`, `throttled`, ...)
    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Diagnostics from all issues are joined; details text fills gaps.
    #[test]
    fn test_summary_joins_issue_text() {
        let body = r#"{
            "resourceType": "OperationOutcome",
            "issue": [
                {"severity": "error", "code": "required", "diagnostics": "Patient.name is required"},
                {"severity": "warning", "code": "value", "details": {"text": "birthDate in the future"}},
                {"severity": "information", "code": "informational"}
            ]
        }"#;

        let outcome = OperationOutcome::from_body(body).expect("outcome");
        assert_eq!(outcome.issue.len(), 3);
        assert_eq!(outcome.issue[1].severity, IssueSeverity::Warning);
        assert_eq!(
            outcome.summary().as_deref(),
            Some("Patient.name is required; birthDate in the future")
        );
    }

    #[test]
    fn test_from_body_rejects_other_documents() {
        assert!(OperationOutcome::from_body(r#"{"resourceType":"Patient"}"#).is_none());
        assert!(OperationOutcome::from_body("<html>Bad Gateway</html>").is_none());
        assert_eq!(OperationOutcome::error("not-found", "").summary(), None);
    }
}
