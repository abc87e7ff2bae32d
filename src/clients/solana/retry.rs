use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first try included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay to wait after the `attempt`-th failed attempt (1-based), or `None`
    /// when no attempts remain.
    pub fn backoff_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.config.max_attempts {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let capped_ms = base_ms.min(self.config.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped_ms as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
        })
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = policy(4);
        assert_eq!(policy.backoff_after(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.backoff_after(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.backoff_after(3), Some(Duration::from_millis(350)));
        assert_eq!(policy.backoff_after(4), None);
    }

    #[test]
    fn single_attempt_never_backs_off() {
        assert_eq!(policy(1).backoff_after(1), None);
    }
}
