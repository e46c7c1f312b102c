//! Retry guard for venue calls
//!
//! Every call first passes the shared [`RateLimiter`], then runs with
//! classified retries. Rate-limit errors back off for at least 15 seconds,
//! other transient errors back off exponentially up to 5 seconds, anything
//! else is returned at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::rate_limiter::{RateLimiter, RequestPriority};
use crate::config::RetryConfig;
use crate::error::VenueError;

/// Fixed part of a rate-limit backoff
pub const RATE_LIMIT_FLOOR: Duration = Duration::from_secs(15);
/// Cap on the exponential part of a rate-limit backoff
pub const RATE_LIMIT_BACKOFF_CAP: Duration = Duration::from_secs(10);
/// Cap on transient-error backoff
pub const TRANSIENT_BACKOFF_CAP: Duration = Duration::from_secs(5);

/// How a failed call should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// The venue pushed back (HTTP 429 or equivalent)
    RateLimited,
    /// Network hiccup or similar, worth another try
    Transient,
    /// Retrying will not help
    Fatal,
}

/// Errors that know whether they are worth retrying
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

/// Classify free-form error text the way venue APIs tend to phrase it
fn classify_text(text: &str) -> RetryClass {
    if text.contains("429") || text.contains("Rate limit") || text.contains("rate limit") {
        RetryClass::RateLimited
    } else if text.contains("Rate") {
        RetryClass::Transient
    } else {
        RetryClass::Fatal
    }
}

impl Retryable for VenueError {
    fn retry_class(&self) -> RetryClass {
        match self {
            VenueError::Http { status: 429, .. } | VenueError::RateLimited(_) => {
                RetryClass::RateLimited
            }
            VenueError::Io(_) => RetryClass::Transient,
            VenueError::Http { message, .. }
            | VenueError::Rejected(message)
            | VenueError::Other(message) => classify_text(message),
            VenueError::InsufficientMargin(_)
            | VenueError::UnknownSymbol(_)
            | VenueError::OrderNotFound(_) => RetryClass::Fatal,
        }
    }
}

/// Retry budget and backoff base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn exponential(&self, attempt: u32, cap: Duration) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(cap)
    }

    /// Delay before retry number `attempt + 1`, or `None` if the error is fatal
    pub fn backoff(&self, class: RetryClass, attempt: u32) -> Option<Duration> {
        match class {
            RetryClass::RateLimited => {
                Some(RATE_LIMIT_FLOOR + self.exponential(attempt, RATE_LIMIT_BACKOFF_CAP))
            }
            RetryClass::Transient => Some(self.exponential(attempt, TRANSIENT_BACKOFF_CAP)),
            RetryClass::Fatal => None,
        }
    }
}

/// Rate gate plus classified retries around async operations
#[derive(Debug, Clone)]
pub struct RetryGuard {
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl RetryGuard {
    pub fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self { limiter, policy }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Gate on the limiter at `priority`, then run `op` with the default policy
    pub async fn run<T, E, F, Fut>(
        &self,
        op_name: &str,
        priority: RequestPriority,
        op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        self.execute(op_name, Some(priority), self.policy, op).await
    }

    /// Same as [`RetryGuard::run`] with a different retry budget
    pub async fn run_with_policy<T, E, F, Fut>(
        &self,
        op_name: &str,
        priority: RequestPriority,
        policy: RetryPolicy,
        op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        self.execute(op_name, Some(priority), policy, op).await
    }

    /// Retries without consulting the limiter
    pub async fn run_ungated<T, E, F, Fut>(&self, op_name: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        self.execute(op_name, None, self.policy, op).await
    }

    async fn execute<T, E, F, Fut>(
        &self,
        op_name: &str,
        priority: Option<RequestPriority>,
        policy: RetryPolicy,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        if let Some(priority) = priority {
            let waited = self.limiter.wait_if_needed(priority).await;
            if !waited.is_zero() {
                debug!("{}: rate limit wait {:.2}s", op_name, waited.as_secs_f64());
            }
        }

        let mut attempt = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let class = err.retry_class();
            let delay = match policy.backoff(class, attempt) {
                Some(delay) if attempt < policy.max_retries => delay,
                _ => return Err(err),
            };

            if class == RetryClass::RateLimited {
                warn!(
                    "{}: rate limited, retrying in {:.2}s ({}/{})",
                    op_name,
                    delay.as_secs_f64(),
                    attempt + 1,
                    policy.max_retries
                );
            } else {
                warn!(
                    "{}: retry {}/{} in {:.2}s ({})",
                    op_name,
                    attempt + 1,
                    policy.max_retries,
                    delay.as_secs_f64(),
                    err
                );
            }

            attempt += 1;
            sleep(delay).await;
        }
    }
}
