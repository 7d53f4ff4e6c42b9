//! Minimum-interval limiter for a single origin
//!
//! One [`RateLimiter`] guards every request to the artifact origin.
//! [`RateLimiter::acquire`] hands out a [`RateLimitSlot`] that keeps the lock
//! until it is dropped, so callers hold it across the whole request and no two
//! requests to the origin are ever in flight at once.

use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Server-provided Retry-After values above this are capped.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    /// `None` until the first request, which proceeds immediately.
    last_request: Mutex<Option<Instant>>,
}

/// Exclusive right to talk to the origin; released on drop.
#[must_use = "the origin is released as soon as the slot is dropped"]
#[derive(Debug)]
pub struct RateLimitSlot<'a> {
    min_interval: Duration,
    last_request: MutexGuard<'a, Option<Instant>>,
}

impl RateLimitSlot<'_> {
    /// Push the next permitted request out by `delay` (server back-pressure).
    pub fn defer(&mut self, delay: Duration) {
        push_out(&mut self.last_request, self.min_interval, delay);
    }
}

fn push_out(last_request: &mut Option<Instant>, min_interval: Duration, delay: Duration) {
    let now = Instant::now();
    // acquire() waits min_interval after the stored instant
    let target = now + delay;
    let stored = target.checked_sub(min_interval).unwrap_or(now);
    if last_request.map_or(true, |prev| prev < stored) {
        *last_request = Some(stored);
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until at least `min_interval` has passed since the previous
    /// request started, then claim the origin until the slot is dropped.
    #[instrument(skip(self), fields(interval_ms = self.min_interval.as_millis() as u64))]
    pub async fn acquire(&self) -> RateLimitSlot<'_> {
        let mut last_request = self.last_request.lock().await;

        if let Some(previous) = *last_request {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                let delay = ready_at - now;
                debug!(delay_ms = delay.as_millis() as u64, "applying rate limit delay");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last_request = Some(Instant::now());
        RateLimitSlot {
            min_interval: self.min_interval,
            last_request,
        }
    }

    /// Push the next permitted request out by `delay`, waiting for any
    /// request in flight to finish first.
    pub async fn defer(&self, delay: Duration) {
        let mut last_request = self.last_request.lock().await;
        push_out(&mut last_request, self.min_interval, delay);
    }
}

/// Parse a Retry-After header: delta seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    let delay = if let Ok(seconds) = value.parse::<u64>() {
        Duration::from_secs(seconds)
    } else {
        let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
        let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        delta.to_std().unwrap_or(Duration::ZERO)
    };

    if delay > MAX_RETRY_AFTER {
        warn!(
            delay_secs = delay.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        return Some(MAX_RETRY_AFTER);
    }
    Some(delay)
}
