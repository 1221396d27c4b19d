//! Circuit breaker guarding calls to a remote server.
//!
//! The breaker counts consecutive failures. Once the count reaches the
//! configured threshold the circuit opens and calls are rejected without
//! being invoked. After the recovery timeout has strictly elapsed since the
//! last failure, the next call is admitted as a single half-open probe: its
//! success closes the circuit, its failure re-opens it.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Source of monotonic time for the breaker's recovery window.
///
/// Production code uses [`SystemClock`]; tests drive a [`MockClock`] so the
/// open → half-open transition can be exercised without sleeping.
pub trait Clock: Send + Sync + 'static {
    /// Current monotonic instant
    fn now(&self) -> Instant;
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Mock clock for deterministic testing.
///
/// Clones share the same elapsed offset, so a test can hand one clone to the
/// breaker and keep another to advance time.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Total time advanced so far
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock()
    }
}

//==============================================================================
// Error Types
//==============================================================================

/// Configuration validation error shared by the breaker and retry configs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced by a breaker-guarded call.
///
/// Generic over the wrapped operation's error so the original failure is
/// preserved intact in [`ResilienceError::OperationFailed`].
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The circuit is open (or a half-open probe is already in flight)
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// The underlying operation failed
    #[error("{source}")]
    OperationFailed {
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Unwrap the operation's own error, if this was not a rejection
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::CircuitOpen => None,
            Self::OperationFailed { source } => Some(source),
        }
    }
}

/// Result type for breaker-guarded operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

//==============================================================================
// State & Configuration
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// A single probe call is allowed through to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Lowercase label used in status reporting
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time since the last failure after which a probe is admitted
    pub recovery_timeout: Duration,
    /// Probes allowed in flight while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid {
                message: "half_open_max_calls must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of breaker state for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    probes_in_flight: u32,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            probes_in_flight: 0,
        }
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Circuit breaker over async operations.
///
/// Cloning is cheap; clones share state.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    total_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            total_calls: Arc::clone(&self.total_calls),
            rejected_calls: Arc::clone(&self.rejected_calls),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a circuit breaker backed by the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

/// Releases a half-open probe slot even when the guarded future is dropped
/// before completing.
struct ProbeSlot<'a> {
    inner: &'a Mutex<BreakerState>,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(BreakerState::closed())),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
        })
    }

    /// Configuration this breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a call may proceed.
    ///
    /// Returns `Some(true)` for a half-open probe, `Some(false)` for a
    /// normal closed-circuit call, `None` when the call must be rejected.
    fn admit(&self) -> Option<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let now = self.clock.now();
                let recovered = inner.last_failure_time.map_or(true, |failed_at| {
                    now.saturating_duration_since(failed_at) > self.config.recovery_timeout
                });
                if !recovered {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probes_in_flight = 1;
                info!("Circuit breaker half-open, admitting probe");
                Some(true)
            }
            CircuitState::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_max_calls {
                    inner.probes_in_flight += 1;
                    Some(true)
                } else {
                    None
                }
            }
        }
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// Rejected calls never invoke `operation`.
    #[instrument(skip(self, operation), fields(state = %self.get_state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(is_probe) = self.admit() else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!("Circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen);
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let _slot = is_probe.then(|| ProbeSlot { inner: &self.inner });

        match operation().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                self.record_failure();
                debug!(error = %error, "Circuit breaker: operation failed");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Record a successful operation; closes the circuit from any state
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(previous = %inner.state, "Circuit breaker closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        failures = inner.failure_count,
                        "Circuit breaker opened after reaching failure threshold"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!("Circuit breaker re-opened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state of the circuit breaker
    pub fn get_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current state (alias for [`Self::get_state`])
    pub fn state(&self) -> CircuitState {
        self.get_state()
    }

    /// Snapshot of the breaker's counters
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker back to closed with a zero failure count
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
        info!("Circuit breaker manually reset to closed state");
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            inner: Arc::new(Mutex::new(BreakerState::closed())),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(SystemClock),
        }
    }
}
