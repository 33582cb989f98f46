use std::time::Duration;

/// Retry budget and backoff curve configured once per client instance.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Backoff delay for a zero-based attempt index.
    ///
    /// Exponential growth capped at `max_delay_ms`, then widened by a uniform
    /// jitter of 10–30% of the capped value, rounded to the nearest
    /// millisecond.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(20);
        let multiplier = 1_u64 << shift;
        let capped = self
            .base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms);
        let jitter = capped as f64 * (0.1 + rand::random::<f64>() * 0.2);
        Duration::from_millis((capped as f64 + jitter).round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500, 5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_delay_bounds(policy: &RetryPolicy, attempt: u32, expected_base_ms: u64) {
        let delay = policy.delay_for_attempt(attempt).as_millis() as u64;
        assert!(
            delay >= expected_base_ms,
            "attempt {attempt}: delay {delay}ms below base {expected_base_ms}ms"
        );
        let upper = (expected_base_ms as f64 * 1.3).round() as u64 + 1;
        assert!(
            delay <= upper,
            "attempt {attempt}: delay {delay}ms above jitter ceiling {upper}ms"
        );
    }

    #[test]
    fn scales_exponentially_with_jitter_bounds() {
        let policy = RetryPolicy::new(3, 100, 10_000);
        assert_delay_bounds(&policy, 0, 100);
        assert_delay_bounds(&policy, 1, 200);
        assert_delay_bounds(&policy, 3, 800);
    }

    #[test]
    fn caps_delay_before_applying_jitter() {
        let policy = RetryPolicy::new(3, 1_000, 4_000);
        assert_delay_bounds(&policy, 5, 4_000);
        assert_delay_bounds(&policy, 20, 4_000);
    }

    #[test]
    fn survives_huge_attempt_indexes() {
        let policy = RetryPolicy::new(3, 500, 5_000);
        assert_delay_bounds(&policy, u32::MAX, 5_000);
    }

    #[test]
    fn default_policy_matches_client_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.base_delay_ms(), 500);
        assert_eq!(policy.max_delay_ms(), 5_000);
    }
}
