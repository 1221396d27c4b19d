//! Resource type names

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// FHIR resource type.
///
/// The clinical types the viewer works with are named variants; anything
/// else the server exposes is carried as [`ResourceType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    Patient,
    Encounter,
    Observation,
    Condition,
    MedicationRequest,
    DiagnosticReport,
    Procedure,
    Organization,
    Practitioner,
    Bundle,
    OperationOutcome,
    Other(String),
}

impl ResourceType {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Encounter => "Encounter",
            ResourceType::Observation => "Observation",
            ResourceType::Condition => "Condition",
            ResourceType::MedicationRequest => "MedicationRequest",
            ResourceType::DiagnosticReport => "DiagnosticReport",
            ResourceType::Procedure => "Procedure",
            ResourceType::Organization => "Organization",
            ResourceType::Practitioner => "Practitioner",
            ResourceType::Bundle => "Bundle",
            ResourceType::OperationOutcome => "OperationOutcome",
            ResourceType::Other(name) => name,
        }
    }

    /// Clinical types that reference an encounter and can be listed per visit
    pub fn is_encounter_scoped(&self) -> bool {
        matches!(
            self,
            ResourceType::Observation
                | ResourceType::Condition
                | ResourceType::MedicationRequest
                | ResourceType::DiagnosticReport
                | ResourceType::Procedure
        )
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ResourceType {
    fn from(name: &str) -> Self {
        match name {
            "Patient" => ResourceType::Patient,
            "Encounter" => ResourceType::Encounter,
            "Observation" => ResourceType::Observation,
            "Condition" => ResourceType::Condition,
            "MedicationRequest" => ResourceType::MedicationRequest,
            "DiagnosticReport" => ResourceType::DiagnosticReport,
            "Procedure" => ResourceType::Procedure,
            "Organization" => ResourceType::Organization,
            "Practitioner" => ResourceType::Practitioner,
            "Bundle" => ResourceType::Bundle,
            "OperationOutcome" => ResourceType::OperationOutcome,
            other => ResourceType::Other(other.to_string()),
        }
    }
}

impl From<String> for ResourceType {
    fn from(name: String) -> Self {
        ResourceType::from(name.as_str())
    }
}

impl From<ResourceType> for String {
    fn from(resource_type: ResourceType) -> Self {
        resource_type.as_str().to_string()
    }
}

impl FromStr for ResourceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ResourceType::from(s))
    }
}

/// `resourceType` of a resource document
pub fn resource_type_of(resource: &Value) -> Option<ResourceType> {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(ResourceType::from)
}

/// Logical `id` of a resource document
pub fn resource_id(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_round_trips_through_string() {
        assert_eq!(ResourceType::from("MedicationRequest"), ResourceType::MedicationRequest);
        assert_eq!(ResourceType::from("Immunization"), ResourceType::Other("Immunization".into()));
        assert_eq!(ResourceType::Other("Immunization".into()).to_string(), "Immunization");

        let json = serde_json::to_value(ResourceType::DiagnosticReport).expect("serialize");
        assert_eq!(json, json!("DiagnosticReport"));
    }

    #[test]
    fn test_resource_accessors() {
        let patient = json!({"resourceType": "Patient", "id": "p1"});
        assert_eq!(resource_type_of(&patient), Some(ResourceType::Patient));
        assert_eq!(resource_id(&patient), Some("p1"));
        assert_eq!(resource_type_of(&json!({"id": "x"})), None);
        assert_eq!(resource_id(&json!({"resourceType": "Patient", "id": ""})), None);
    }
}
