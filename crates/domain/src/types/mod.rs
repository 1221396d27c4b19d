//! FHIR R4 wire types
//!
//! Resources themselves travel as `serde_json::Value`: the client layer is
//! agnostic to resource contents and only needs the envelope types below.

pub mod bundle;
pub mod outcome;
pub mod resource;
pub mod search;

pub use bundle::{Bundle, BundleEntry, BundleEntryRequest, BundleEntryResponse, BundleLink, BundleType};
pub use outcome::{CodeableConcept, Coding, IssueSeverity, OperationOutcome, OperationOutcomeIssue};
pub use resource::{resource_id, resource_type_of, ResourceType};
pub use search::SearchParams;
