//! Resilience patterns for calls against an unreliable remote server.
//!
//! - **Circuit Breaker**: stops hammering a server that keeps failing and
//!   lets a single probe through once the recovery window has passed.
//! - **Retry**: re-runs an operation with exponential backoff and jitter
//!   while a caller-supplied predicate says the failure is transient.
//!
//! Both are generic over the operation's error type. The FHIR client in
//! `clinview-infra` composes them as retry(breaker(request)), so every retry
//! attempt is counted by the breaker and an open circuit is surfaced as a
//! fast, non-retryable failure.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, Clock, ConfigError, ConfigResult, MockClock, ResilienceError, ResilienceResult,
    SystemClock,
};
pub use retry::{
    default_retry_condition, presets, try_with_retry, with_retry, RetryCondition, RetryConfig,
    RetryConfigBuilder, RetryHook, RetryOutcome, RetryPolicy, TransientError, JITTER_RATIO,
};
