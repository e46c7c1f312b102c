//! Sliding-window rate limiter
//!
//! Allows at most `max_calls` within any `period`. Callers that would exceed
//! the window are parked until the oldest call ages out. The window lock is
//! held across that wait, so queued callers are admitted one at a time and
//! in arrival order.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// High-priority callers only wait when a slot frees up sooner than this
pub const HIGH_PRIORITY_MAX_WAIT: Duration = Duration::from_secs(5);
/// Low-priority callers wait at least this long once the window is full
pub const LOW_PRIORITY_MIN_WAIT: Duration = Duration::from_secs(1);

/// How urgently a call needs to go out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestPriority {
    /// Order placement and cancels
    High,
    /// Ordinary reads
    Normal,
    /// Periodic refreshes that can wait
    Low,
}

impl std::fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestPriority::High => write!(f, "high"),
            RequestPriority::Normal => write!(f, "normal"),
            RequestPriority::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    priority_bypass: bool,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A zero `max_calls` is raised to one call per period
    pub fn new(max_calls: usize, period: Duration, priority_bypass: bool) -> Self {
        if max_calls == 0 {
            warn!("Rate limiter built with max_calls = 0, allowing 1 call per period");
        }
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            period,
            priority_bypass,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// 12 calls per 60 seconds with high-priority bypass
    pub fn with_defaults() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_calls, config.period(), config.priority_bypass)
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Drop calls that have aged out of the window
    fn purge(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = calls.front() {
            if now.duration_since(oldest) >= self.period {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the oldest call leaves the window, if the window is full
    fn wait_for_slot(&self, calls: &VecDeque<Instant>, now: Instant) -> Option<Duration> {
        if calls.len() < self.max_calls {
            return None;
        }
        calls
            .front()
            .map(|&oldest| self.period.saturating_sub(now.duration_since(oldest)))
    }

    /// Wait until a call at `priority` is allowed, then record it.
    ///
    /// Returns how long the caller was held back. With bypass enabled,
    /// high-priority calls only wait when a slot frees up within
    /// [`HIGH_PRIORITY_MAX_WAIT`]; otherwise they go out immediately even if
    /// the window is full.
    pub async fn wait_if_needed(&self, priority: RequestPriority) -> Duration {
        let mut calls = self.calls.lock().await;
        let mut now = Instant::now();
        self.purge(&mut calls, now);

        let mut waited = Duration::ZERO;
        if let Some(wait) = self.wait_for_slot(&calls, now) {
            let wait = match priority {
                RequestPriority::High if self.priority_bypass => {
                    if wait < HIGH_PRIORITY_MAX_WAIT {
                        wait
                    } else {
                        debug!("High-priority call bypasses a {:.2}s wait", wait.as_secs_f64());
                        Duration::ZERO
                    }
                }
                RequestPriority::Low => wait.max(LOW_PRIORITY_MIN_WAIT),
                _ => wait,
            };

            if !wait.is_zero() {
                warn!(
                    "Rate limit reached ({}/{}), {} priority call waits {:.2}s",
                    calls.len(),
                    self.max_calls,
                    priority,
                    wait.as_secs_f64()
                );
                sleep(wait).await;
                now = Instant::now();
                self.purge(&mut calls, now);
                waited = wait;
            }
        }

        calls.push_back(now);
        waited
    }

    /// Calls inside the current window
    pub async fn get_current_calls(&self) -> usize {
        let mut calls = self.calls.lock().await;
        self.purge(&mut calls, Instant::now());
        calls.len()
    }

    pub async fn get_remaining_calls(&self) -> usize {
        self.max_calls.saturating_sub(self.get_current_calls().await)
    }

    /// Forget every recorded call
    pub async fn reset(&self) {
        self.calls.lock().await.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::with_defaults()
    }
}
