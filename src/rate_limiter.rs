// src/rate_limiter.rs

//! Minimum-interval gate shared by every outbound explorer request.
//!
//! Block explorers throttle free API keys to a handful of calls per second.
//! [`IntervalRateLimiter::acquire`] suspends only the calling task until the
//! configured interval has elapsed since the previous grant; other tasks keep
//! running. Waiters are served in FIFO order (tokio's `Mutex` is fair).

use crate::metrics;
use async_trait::async_trait;
use log::debug;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Time source for the limiter. Swappable so tests can run deterministically.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep_until(&self, deadline: Instant);
}

/// Tokio's clock. Honors `tokio::time::pause()` in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// A clock that only moves when someone sleeps on it.
///
/// `sleep_until` jumps the clock forward to the deadline and yields once, so
/// grant timestamps are exact and tests never wait on wall time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<StdMutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(StdMutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep_until(&self, deadline: Instant) {
        {
            let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
            if *now < deadline {
                *now = deadline;
            }
        }
        tokio::task::yield_now().await;
    }
}

/// Serializes grants so that consecutive grants are at least `min_interval` apart.
pub struct IntervalRateLimiter {
    min_interval: Duration,
    last_grant: Mutex<Option<Instant>>,
    clock: Arc<dyn Clock>,
}

impl IntervalRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, Arc::new(TokioClock))
    }

    pub fn with_clock(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            last_grant: Mutex::new(None),
            clock,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits for the next slot and returns the instant the grant was recorded.
    ///
    /// Never fails. The lock is held across the wait, which is what keeps two
    /// grants from landing inside one interval.
    pub async fn acquire(&self) -> Instant {
        let mut last_grant = self.last_grant.lock().await;
        let requested = self.clock.now();

        if let Some(previous) = *last_grant {
            let ready_at = previous + self.min_interval;
            if requested < ready_at {
                debug!(
                    "rate limiter: waiting {:?} for next explorer slot",
                    ready_at - requested
                );
                self.clock.sleep_until(ready_at).await;
            }
        }

        let granted = self.clock.now();
        metrics::record_rate_limit_wait(granted.saturating_duration_since(requested));
        *last_grant = Some(granted);
        granted
    }
}

impl std::fmt::Debug for IntervalRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalRateLimiter")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
