//! FHIR Bundle: search results and batch/transaction envelopes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resource::{resource_type_of, ResourceType};

/// Bundle.type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Searchset,
    Batch,
    BatchResponse,
    Transaction,
    TransactionResponse,
    Collection,
    History,
    Document,
    Message,
}

/// FHIR Bundle resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "bundle_resource_type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub bundle_type: BundleType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

fn bundle_resource_type() -> String {
    "Bundle".to_string()
}

/// Bundle.link (paging)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

/// Bundle.entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleEntryRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleEntryResponse>,
}

/// Bundle.entry.request for batch/transaction submissions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntryRequest {
    pub method: String,
    pub url: String,
}

/// Bundle.entry.response in batch/transaction responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntryResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Bundle {
    pub fn new(bundle_type: BundleType) -> Self {
        Self {
            resource_type: bundle_resource_type(),
            id: None,
            bundle_type,
            total: None,
            link: Vec::new(),
            entry: Vec::new(),
        }
    }

    pub fn transaction() -> Self {
        Self::new(BundleType::Transaction)
    }

    pub fn batch() -> Self {
        Self::new(BundleType::Batch)
    }

    /// Append a request entry (`POST Patient`, `PUT Patient/123`, ...)
    pub fn with_request(
        mut self,
        method: impl Into<String>,
        url: impl Into<String>,
        resource: Option<Value>,
    ) -> Self {
        self.entry.push(BundleEntry {
            full_url: None,
            resource,
            request: Some(BundleEntryRequest { method: method.into(), url: url.into() }),
            response: None,
        });
        self
    }

    /// All embedded resources
    pub fn resources(&self) -> impl Iterator<Item = &Value> {
        self.entry.iter().filter_map(|entry| entry.resource.as_ref())
    }

    /// Embedded resources of one type (skips included resources of others)
    pub fn resources_of<'a>(
        &'a self,
        resource_type: &'a ResourceType,
    ) -> impl Iterator<Item = &'a Value> + 'a {
        self.resources()
            .filter(move |resource| resource_type_of(resource).as_ref() == Some(resource_type))
    }

    /// URL of the `next` paging link
    pub fn next_link(&self) -> Option<&str> {
        self.link.iter().find(|link| link.relation == "next").map(|link| link.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Parses a searchset and filters resources by type.
    #[test]
    fn test_searchset_parsing() {
        let bundle: Bundle = serde_json::from_value(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": 2,
            "link": [{"relation": "next", "url": "http://fhir/Patient?page=2"}],
            "entry": [
                {"fullUrl": "http://fhir/Patient/1", "resource": {"resourceType": "Patient", "id": "1"}},
                {"resource": {"resourceType": "Organization", "id": "o1"}}
            ]
        }))
        .expect("parse");

        assert_eq!(bundle.bundle_type, BundleType::Searchset);
        assert_eq!(bundle.total, Some(2));
        assert_eq!(bundle.resources().count(), 2);
        assert_eq!(bundle.resources_of(&ResourceType::Patient).count(), 1);
        assert_eq!(bundle.next_link(), Some("http://fhir/Patient?page=2"));
    }

    /// Transaction bundles serialize with request entries.
    #[test]
    fn test_transaction_serialization() {
        let bundle = Bundle::transaction()
            .with_request("POST", "Patient", Some(json!({"resourceType": "Patient"})))
            .with_request("DELETE", "Observation/9", None);

        let value = serde_json::to_value(&bundle).expect("serialize");
        assert_eq!(value["resourceType"], "Bundle");
        assert_eq!(value["type"], "transaction");
        assert_eq!(value["entry"][1]["request"]["method"], "DELETE");
        assert!(value["entry"][1].get("resource").is_none());
    }
}
