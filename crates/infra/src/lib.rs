//! # ClinView Infrastructure
//!
//! I/O-facing implementations of the ClinView client layer.
//!
//! This crate contains:
//! - HTTP transport over `reqwest`
//! - The base FHIR REST client and the enhanced client that layers retry,
//!   circuit breaking, response caching and offline queue replay over it
//! - The offline store, connectivity monitor and offline-aware fetcher
//! - Configuration loading and tracing setup
//!
//! ## Architecture
//! - Generic resilience and storage primitives come from `clinview-common`
//! - Wire types and configuration models come from `clinview-domain`

pub mod config;
pub mod fhir;
pub mod http;
pub mod observability;
pub mod offline;

// Re-export commonly used items
pub use fhir::{
    ClientHooks, CircuitBreakerStatus, EnhancedClientOptions, EnhancedFhirClient, FhirClient,
    FhirClientConfig, FhirError, FhirResult,
};
pub use offline::{
    CacheEntry, ConnectivityMonitor, ConnectivityState, OfflineFetcher, OfflineOperation,
    OfflineStore, QueueReport, QueuedOperation,
};
