//! Application constants
//!
//! Centralized location for domain-level constants used by the client layer.

// FHIR wire format
pub const FHIR_JSON_MEDIA_TYPE: &str = "application/fhir+json";
pub const CAPABILITY_STATEMENT_PATH: &str = "metadata";
pub const MAX_RESOURCE_ID_LEN: usize = 64;

// Client defaults
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_USER_AGENT: &str = concat!("clinview/", env!("CARGO_PKG_VERSION"));

// Connectivity monitor defaults
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

// Cached data older than this is reported stale
pub const CACHE_STALE_AFTER_MS: u64 = 5 * 60 * 1000;
