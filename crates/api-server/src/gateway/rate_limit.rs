//! Sliding-window limiter for connection attempts per source address

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Addresses tracked before stale entries are swept
const SWEEP_THRESHOLD: usize = 10_000;

pub struct ConnectRateLimiter {
    max_attempts: usize,
    window: Duration,
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
}

impl ConnectRateLimiter {
    pub fn new(max_attempts: usize) -> Self {
        Self::with_window(max_attempts, RATE_LIMIT_WINDOW)
    }

    pub fn with_window(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt from `address`. Returns false once the address has
    /// used its budget for the current window; refused attempts are not
    /// recorded.
    pub async fn check(&self, address: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        let mut attempts = self.attempts.lock().await;

        if attempts.len() > SWEEP_THRESHOLD {
            attempts.retain(|_, times| times.iter().any(|t| now.duration_since(*t) < window));
        }

        let recent = attempts.entry(address.to_string()).or_default();
        recent.retain(|t| now.duration_since(*t) < window);
        if recent.len() >= self.max_attempts {
            return false;
        }
        recent.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budget_is_per_address() {
        let limiter = ConnectRateLimiter::new(2);
        assert!(limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = ConnectRateLimiter::with_window(1, Duration::from_millis(50));
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);

        tokio::time::advance(Duration::from_millis(80)).await;
        assert!(limiter.check("10.0.0.1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_attempts_do_not_extend_the_window() {
        let limiter = ConnectRateLimiter::with_window(1, Duration::from_millis(50));
        assert!(limiter.check("10.0.0.1").await);

        tokio::time::advance(Duration::from_millis(30)).await;
        assert!(!limiter.check("10.0.0.1").await);

        // only the first attempt counts, so the budget is back at 50ms
        tokio::time::advance(Duration::from_millis(30)).await;
        assert!(limiter.check("10.0.0.1").await);
    }

    #[tokio::test]
    async fn zero_budget_refuses_everything() {
        let limiter = ConnectRateLimiter::new(0);
        assert!(!limiter.check("10.0.0.1").await);
    }
}
