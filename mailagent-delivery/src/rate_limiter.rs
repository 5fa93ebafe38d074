//! Per-worker send throttling.
//!
//! The limiter counts sends inside a window. Once the count runs ahead of what
//! the configured rate allows for the time elapsed, the caller sleeps until the
//! rate catches up. Every call starts a fresh window, so idle time never turns
//! into a burst allowance.
//!
//! ```text
//! rate: 2/s
//! send #1 at t=0.0  -> 1 > 0.0 expected, sleep 0.5s, window restarts at t=0.5
//! send #2 at t=0.5  -> 1 > 0.0 expected, sleep 0.5s, window restarts at t=1.0
//! ```
//!
//! A rate of zero (or anything not positive) disables throttling.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Window {
    sent: u32,
    start: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_per_second: f64,
    window: Mutex<Window>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_per_second: f64) -> Self {
        Self {
            max_per_second,
            window: Mutex::new(Window {
                sent: 0,
                start: Instant::now(),
            }),
        }
    }

    /// A limiter that never waits.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.max_per_second.is_finite() && self.max_per_second > 0.0
    }

    /// Record one send and work out how long the caller has to wait.
    fn reserve(&self) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }

        let now = Instant::now();
        let mut window = self.window.lock();

        window.sent = window.sent.saturating_add(1);
        let elapsed = now.saturating_duration_since(window.start).as_secs_f64();
        let sent = f64::from(window.sent);

        if sent <= elapsed * self.max_per_second {
            window.start = now;
            window.sent = 0;
            return Duration::ZERO;
        }

        let delay =
            Duration::try_from_secs_f64(sent / self.max_per_second - elapsed).unwrap_or_default();

        window.start = now.checked_add(delay).unwrap_or(now);
        window.sent = 0;

        delay
    }

    /// Count a completed send, sleeping if the rate has been exceeded.
    ///
    /// Returns how long the call slept.
    pub async fn throttle(&self) -> Duration {
        let delay = self.reserve();

        if !delay.is_zero() {
            tracing::debug!(delay = ?delay, "Send rate exceeded, throttling");
            tokio::time::sleep(delay).await;
        }

        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_waits() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();

        for _ in 0..100 {
            assert_eq!(limiter.throttle().await, Duration::ZERO);
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!RateLimiter::new(-1.0).is_enabled());
        assert!(!RateLimiter::new(f64::NAN).is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_rate_is_bounded() {
        let limiter = RateLimiter::new(2.0);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.throttle().await;
        }

        // Five sends at 2/s cannot complete in less than two seconds.
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_when_under_rate() {
        let limiter = RateLimiter::new(10.0);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(limiter.throttle().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_is_not_banked() {
        let limiter = RateLimiter::new(1.0);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let start = Instant::now();
        for _ in 0..10 {
            limiter.throttle().await;
        }

        // K sends back to back take at least (K - 1) / R however long the worker idled.
        assert!(start.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_unthrottled_send_waits() {
        let limiter = RateLimiter::new(2.0);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(limiter.throttle().await, Duration::ZERO);
        assert_eq!(limiter.throttle().await, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_restarts_after_wait() {
        let limiter = RateLimiter::new(1.0);

        assert_eq!(limiter.throttle().await, Duration::from_secs(1));
        assert_eq!(limiter.throttle().await, Duration::from_secs(1));
    }
}
