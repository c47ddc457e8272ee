use std::time::Duration;

use crate::config::RetryConfig;

/// `min(base * 2^attempt, max)`, no jitter. `attempt` is the number of
/// retries the task already had.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let secs = config
        .base_delay_secs
        .saturating_mul(factor)
        .min(config.max_delay_secs);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay(&config, 0), Duration::from_secs(30));
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(60));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(240));
        assert_eq!(backoff_delay(&config, 6), Duration::from_secs(1800));
    }

    #[test]
    fn test_huge_attempt_saturates_at_max() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay(&config, 200), Duration::from_secs(1800));
    }

    #[test]
    fn test_zero_base_means_no_wait() {
        let config = RetryConfig {
            base_delay_secs: 0,
            max_delay_secs: 0,
            ..Default::default()
        };
        assert_eq!(backoff_delay(&config, 5), Duration::ZERO);
    }
}
