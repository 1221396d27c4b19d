//! Retry with exponential backoff and proportional jitter.
//!
//! The delay before retry number `n` (1-based, counting failed attempts) is
//!
//! ```text
//! min(base * factor^(n-1) + jitter, max)   where jitter ∈ [0, 10% of base * factor^(n-1)]
//! ```
//!
//! No delay follows the final attempt. Whether a failure is worth retrying is
//! decided per error by a [`RetryCondition`]; the default one looks for
//! network, timeout and abort failures and for 5xx statuses.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::circuit_breaker::{ConfigError, ConfigResult, ResilienceError};

/// Upper bound of the random jitter, as a share of the exponential term
pub const JITTER_RATIO: f64 = 0.1;

//==============================================================================
// Error Classification
//==============================================================================

/// What the retry layer needs to know about a failure.
///
/// `kind` plays the role of an error class name (e.g. `"TimeoutError"`) and
/// the [`fmt::Display`] output is the message; both feed the substring
/// heuristics in [`default_retry_condition`].
pub trait TransientError: fmt::Display {
    /// HTTP-like status code attached to the failure, if any
    fn status(&self) -> Option<u16> {
        None
    }

    /// Short name of the failure class
    fn kind(&self) -> &str {
        ""
    }
}

impl<E> TransientError for ResilienceError<E>
where
    E: TransientError + std::error::Error + Send + Sync + 'static,
{
    fn status(&self) -> Option<u16> {
        match self {
            ResilienceError::CircuitOpen => None,
            ResilienceError::OperationFailed { source } => source.status(),
        }
    }

    fn kind(&self) -> &str {
        match self {
            ResilienceError::CircuitOpen => "CircuitOpenError",
            ResilienceError::OperationFailed { source } => source.kind(),
        }
    }
}

/// Default transient-failure predicate.
///
/// Retries when the kind or message mentions `network`, `timeout` or `abort`
/// (case-insensitive), or when the status is in `500..=599`.
pub fn default_retry_condition<E: TransientError + ?Sized>(error: &E) -> bool {
    let kind = error.kind().to_lowercase();
    let message = error.to_string().to_lowercase();
    let transient = ["network", "timeout", "abort"]
        .iter()
        .any(|needle| kind.contains(needle) || message.contains(needle));

    transient || matches!(error.status(), Some(500..=599))
}

//==============================================================================
// Configuration
//==============================================================================

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, before jitter
    pub base_delay: Duration,
    /// Cap applied after jitter
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        presets::STANDARD
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }

        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid {
                message: "backoff_factor must be a finite number >= 1.0".to_string(),
            });
        }

        if self.base_delay > self.max_delay {
            return Err(ConfigError::Invalid {
                message: "base_delay must not exceed max_delay".to_string(),
            });
        }

        Ok(())
    }

    /// Exponential term for a retry, without jitter or cap (milliseconds)
    fn exponential_millis(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        self.base_delay.as_secs_f64() * 1000.0 * self.backoff_factor.powi(exponent)
    }

    /// Delay before retry number `attempt`, without jitter
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let exp_ms = self.exponential_millis(attempt);
        millis_to_duration(if exp_ms.is_finite() { exp_ms.min(max_ms) } else { max_ms })
    }

    /// Delay before retry number `attempt`, jittered and capped
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let exp_ms = self.exponential_millis(attempt);
        if !exp_ms.is_finite() || exp_ms >= max_ms {
            return self.max_delay;
        }

        let jitter_ms = if exp_ms > 0.0 {
            rand::thread_rng().gen_range(0.0..=exp_ms * JITTER_RATIO)
        } else {
            0.0
        };
        millis_to_duration((exp_ms + jitter_ms).min(max_ms))
    }
}

fn millis_to_duration(millis: f64) -> Duration {
    Duration::from_micros((millis.max(0.0) * 1000.0).round() as u64)
}

/// Builder for RetryConfig
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Named backoff profiles
pub mod presets {
    use std::time::Duration;

    use super::RetryConfig;

    /// Patient-safety critical reads: 5 attempts, 1s..30s, ×2
    pub const CRITICAL: RetryConfig = RetryConfig {
        max_attempts: 5,
        base_delay: Duration::from_millis(1000),
        max_delay: Duration::from_millis(30_000),
        backoff_factor: 2.0,
    };

    /// Regular interactive calls: 3 attempts, 1s..10s, ×2
    pub const STANDARD: RetryConfig = RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(1000),
        max_delay: Duration::from_millis(10_000),
        backoff_factor: 2.0,
    };

    /// Latency-sensitive lookups: 2 attempts, 500ms..2s, ×1.5
    pub const QUICK: RetryConfig = RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_millis(2000),
        backoff_factor: 1.5,
    };

    /// Background sync: 10 attempts, 2s..60s, ×2
    pub const BACKGROUND: RetryConfig = RetryConfig {
        max_attempts: 10,
        base_delay: Duration::from_millis(2000),
        max_delay: Duration::from_millis(60_000),
        backoff_factor: 2.0,
    };
}

//==============================================================================
// Policy
//==============================================================================

/// Predicate deciding whether an error is worth another attempt
pub type RetryCondition<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Observer called before each retry with the failed attempt number
pub type RetryHook<E> = Arc<dyn Fn(u32, &E) + Send + Sync>;

/// Backoff configuration plus the retry predicate and an optional observer
pub struct RetryPolicy<E> {
    pub config: RetryConfig,
    condition: RetryCondition<E>,
    on_retry: Option<RetryHook<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            condition: Arc::clone(&self.condition),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E: TransientError + 'static> RetryPolicy<E> {
    /// Policy using [`default_retry_condition`]
    pub fn new(config: RetryConfig) -> Self {
        Self::with_condition(config, |error: &E| default_retry_condition(error))
    }
}

impl<E> RetryPolicy<E> {
    /// Policy using a custom retry predicate
    pub fn with_condition<P>(config: RetryConfig, condition: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self { config, condition: Arc::new(condition), on_retry: None }
    }

    /// Attach an observer invoked before each retry
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(u32, &E) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Attach an already shared observer
    pub fn on_retry_shared(mut self, hook: RetryHook<E>) -> Self {
        self.on_retry = Some(hook);
        self
    }

    /// Whether `error` qualifies for another attempt
    pub fn should_retry(&self, error: &E) -> bool {
        (self.condition)(error)
    }
}

//==============================================================================
// Execution
//==============================================================================

/// Result of a retried operation with attempt bookkeeping
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final value or the last error
    pub result: Result<T, E>,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Sum of the backoff delays slept
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    /// Whether the operation eventually succeeded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Successful value, if any
    pub fn data(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// Last error, if the operation failed
    pub fn error(&self) -> Option<&E> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Run `operation` under `policy` and return its value or its last error
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy<E>, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    try_with_retry(policy, operation).await.result
}

/// Run `operation` under `policy`, never failing, reporting how it went
#[instrument(skip_all, fields(max_attempts = policy.config.max_attempts))]
pub async fn try_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy<E>,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.config.max_attempts.max(1);
    let mut attempt = 1;
    let mut total_delay = Duration::ZERO;

    loop {
        debug!("Executing operation (attempt {}/{})", attempt, max_attempts);

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return RetryOutcome { result: Ok(value), attempts: attempt, total_delay };
            }
            Err(error) => {
                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %error, "All retry attempts exhausted");
                    return RetryOutcome { result: Err(error), attempts: attempt, total_delay };
                }

                if !policy.should_retry(&error) {
                    debug!(error = %error, "Error is not retryable");
                    return RetryOutcome { result: Err(error), attempts: attempt, total_delay };
                }

                if let Some(hook) = &policy.on_retry {
                    hook(attempt, &error);
                }

                let delay = policy.config.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                total_delay += delay;
                attempt += 1;
            }
        }
    }
}
