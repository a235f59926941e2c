//! Process-wide request gate shared by every harvest worker.
//!
//! Wraps a `governor` GCRA limiter configured so that permits are spaced
//! `period / calls` apart with a burst of one. That spacing never lets more
//! than `calls` requests through in any `period`-long window, and callers that
//! have to wait are parked on a timer instead of spinning.

use crate::config::RateLimitConfig;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::num::NonZeroU32;
use std::time::Duration;

/// Shared outbound request limiter. Hand it to clients behind an `Arc`.
pub struct RateLimiter {
    inner: governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    calls: u32,
    period: Duration,
}

impl RateLimiter {
    pub fn new(calls: u32, period: Duration) -> Self {
        let calls = calls.max(1);
        let spacing = (period / calls).max(Duration::from_nanos(1));

        let quota = match Quota::with_period(spacing) {
            Some(q) => q.allow_burst(NonZeroU32::MIN),
            None => Quota::per_second(NonZeroU32::new(calls).unwrap_or(NonZeroU32::MIN)),
        };

        Self {
            inner: governor::RateLimiter::direct(quota),
            calls,
            period,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.calls, config.period())
    }

    /// Wait until one outbound request may be issued.
    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("calls", &self.calls)
            .field("period", &self.period)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_three_windows_of_permits_span_two_periods() {
        const CALLS: u32 = 5;
        const PERIOD: Duration = Duration::from_millis(100);
        const WORKERS: usize = 4;

        let limiter = Arc::new(RateLimiter::new(CALLS, PERIOD));
        let remaining = Arc::new(AtomicUsize::new(3 * CALLS as usize));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..WORKERS {
            let limiter = limiter.clone();
            let remaining = remaining.clone();
            handles.push(tokio::spawn(async move {
                while remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    limiter.acquire().await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("worker panicked");
        }

        assert!(
            start.elapsed() >= 2 * PERIOD,
            "15 permits granted in {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_single_permit_is_immediate() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_zero_calls_is_clamped() {
        let limiter = RateLimiter::new(0, Duration::from_millis(500));
        assert_eq!(limiter.calls(), 1);
        assert_eq!(limiter.period(), Duration::from_millis(500));
    }
}
