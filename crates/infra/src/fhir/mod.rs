//! FHIR R4 REST clients
//!
//! [`FhirClient`] speaks plain REST; [`EnhancedFhirClient`] layers retry,
//! circuit breaking, caching and offline replay over it.

pub mod client;
pub mod enhanced;
pub mod errors;
pub mod request;

pub use client::{validate_resource_id, FhirClient, FhirClientBuilder, FhirClientConfig};
pub use enhanced::{
    CircuitBreakerStatus, ClientHooks, EnhancedClientOptions, EnhancedFhirClient, ErrorHook,
    OfflineHook,
};
pub use errors::{fhir_retry_condition, FhirError, FhirResult};
pub use request::{cache_prefix, Operation, RequestDescriptor};
