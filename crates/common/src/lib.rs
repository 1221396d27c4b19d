//! Shared building blocks for the ClinView client layer.
//!
//! - [`resilience`]: retry with exponential backoff and a circuit breaker,
//!   both generic over the error type of the wrapped operation.
//! - [`storage`]: a small synchronous key-value abstraction standing in for
//!   the browser-style local storage the offline layer persists into.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod resilience;
pub mod storage;

pub use resilience::{
    default_retry_condition, try_with_retry, with_retry, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerMetrics, CircuitState, Clock, ConfigError, ConfigResult, MockClock,
    ResilienceError, ResilienceResult, RetryConfig, RetryOutcome, RetryPolicy, SystemClock,
    TransientError,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError, StorageResult};
