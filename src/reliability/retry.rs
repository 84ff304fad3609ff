//! Retry delay computation (C5)
//!
//! Delay for attempt `n` (1-based, the first attempt has no delay):
//! `delay = min(max_delay, base_delay * backoff(n))`, then multiplied by a
//! jitter factor drawn uniformly from `[0.5, 1.0]` when jitter is enabled.
//! Multiplicative jitter, not a capped-additive-range one: this keeps the
//! delay from ever being stretched past the unjittered value, only shrunk.

use std::time::Duration;

use rand::Rng;

use crate::config::{BackoffStrategy, RetryConfig};

pub struct RetryController;

impl RetryController {
    pub fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let retry_num = (attempt - 1) as i32;
        let backoff = match config.backoff_strategy {
            BackoffStrategy::Exponential => config.exponential_base.powi(retry_num - 1),
            BackoffStrategy::Linear => retry_num as f64,
            BackoffStrategy::Constant => 1.0,
        };
        let base = config.base_delay.as_secs_f64() * backoff;
        let capped = base.min(config.max_delay.as_secs_f64());

        let factor = if config.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };

        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    pub fn has_attempts_remaining(config: &RetryConfig, current_attempt: u32) -> bool {
        current_attempt < config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_jitter() -> RetryConfig {
        let mut config = RetryConfig::default();
        config.jitter = false;
        config
    }

    #[test]
    fn first_attempt_has_no_delay() {
        let config = config_without_jitter();
        assert_eq!(RetryController::delay_for_attempt(&config, 1), Duration::ZERO);
    }

    #[test]
    fn exponential_backoff_doubles_each_retry() {
        let config = config_without_jitter();
        assert_eq!(
            RetryController::delay_for_attempt(&config, 2),
            Duration::from_secs(1)
        );
        assert_eq!(
            RetryController::delay_for_attempt(&config, 3),
            Duration::from_secs(2)
        );
        assert_eq!(
            RetryController::delay_for_attempt(&config, 4),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let mut config = config_without_jitter();
        config.max_delay = Duration::from_secs(5);
        let delay = RetryController::delay_for_attempt(&config, 10);
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[test]
    fn jitter_never_exceeds_unjittered_delay_and_never_negative() {
        let mut config = RetryConfig::default();
        config.jitter = true;
        for attempt in 2..6 {
            let jittered = RetryController::delay_for_attempt(&config, attempt).as_secs_f64();
            let mut unjittered_config = config.clone();
            unjittered_config.jitter = false;
            let unjittered =
                RetryController::delay_for_attempt(&unjittered_config, attempt).as_secs_f64();
            assert!(jittered <= unjittered + f64::EPSILON);
            assert!(jittered >= 0.0);
        }
    }

    #[test]
    fn linear_backoff_grows_by_fixed_increment() {
        let mut config = config_without_jitter();
        config.backoff_strategy = BackoffStrategy::Linear;
        assert_eq!(
            RetryController::delay_for_attempt(&config, 3),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn constant_backoff_never_grows() {
        let mut config = config_without_jitter();
        config.backoff_strategy = BackoffStrategy::Constant;
        assert_eq!(
            RetryController::delay_for_attempt(&config, 5),
            config.base_delay
        );
    }
}
