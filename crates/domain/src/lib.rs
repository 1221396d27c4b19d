//! # ClinView Domain
//!
//! FHIR wire types and configuration models for the ClinView client layer.
//!
//! This crate contains:
//! - FHIR R4 types the client exchanges (resource types, search parameters,
//!   Bundle, OperationOutcome)
//! - Configuration structures shared by the loader and the CLI
//! - Domain error types and Result definitions
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other ClinView crates
//! - Only serialization dependencies; no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
