//! Outbound call throttling
//!
//! A shared sliding-window [`RateLimiter`] plus the [`RetryGuard`] that
//! gates every venue call on it and retries the failures worth retrying.

mod rate_limiter;
mod retry;

pub use rate_limiter::{
    RateLimiter, RequestPriority, HIGH_PRIORITY_MAX_WAIT, LOW_PRIORITY_MIN_WAIT,
};
pub use retry::{
    RetryClass, RetryGuard, RetryPolicy, Retryable, RATE_LIMIT_BACKOFF_CAP, RATE_LIMIT_FLOOR,
    TRANSIENT_BACKOFF_CAP,
};
