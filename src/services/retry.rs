//! Exponential backoff with random jitter for bounded refetch loops.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::domain::models::RetryConfig;

/// Retry schedule for a bounded loop of attempts numbered from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Up to `max_attempts` attempts, backing off from `base_delay`.
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Policy for refetching a visit whose payload failed validation.
    pub fn anomaly_resync(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.anomaly_base_delay_ms))
    }

    /// Policy for refetching a visit whose report PDF is missing.
    pub fn missing_report(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.missing_pdf_base_delay_ms),
        )
    }

    /// Attempts allowed.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic part of the delay after `attempt`: `2^attempt * base`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Full delay after `attempt`: the base backoff plus uniform jitter in
    /// `[0, base_backoff)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt);
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..millis);
        delay + Duration::from_millis(jitter)
    }

    /// Whether another attempt follows `attempt`.
    pub const fn has_next(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Sleep between `attempt` and the next one. Returns immediately after
    /// the final attempt.
    pub async fn pause_after(&self, attempt: u32) {
        if !self.has_next(attempt) {
            return;
        }
        let delay = self.backoff(attempt);
        debug!(attempt, ?delay, "backing off before next attempt");
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.base_backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.base_backoff(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_jitter_stays_below_base_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        for _ in 0..200 {
            let delay = policy.backoff(2);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay < Duration::from_millis(4000));
        }
    }

    #[test]
    fn test_policies_from_config() {
        let config = RetryConfig::default();
        assert_eq!(
            RetryPolicy::anomaly_resync(&config).base_backoff(0),
            Duration::from_millis(500)
        );
        assert_eq!(
            RetryPolicy::missing_report(&config).base_backoff(0),
            Duration::from_millis(1000)
        );
        assert_eq!(RetryPolicy::anomaly_resync(&config).max_attempts(), 3);
    }

    #[tokio::test]
    async fn test_no_pause_after_final_attempt() {
        let policy = RetryPolicy::new(2, Duration::from_secs(60));
        assert!(policy.has_next(0));
        assert!(!policy.has_next(1));

        let started = Instant::now();
        policy.pause_after(1).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
