//! Exponential backoff between reconnection attempts.
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max)
//! ```
//!
//! The attempt budget is either set explicitly or derived from how many steps
//! it takes the delay to reach `max`.

use std::time::Duration;

use thiserror::Error;

use super::config::Config;

#[derive(Debug, Error)]
pub enum BackoffError {
    #[error("Maximum number of attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    max_attempts: Option<u32>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier,
            attempt: 0,
            max_attempts: None,
        }
    }

    /// Builds the policy described by the `reconnect_*` fields of `config`.
    ///
    /// `max_reconnect_attempts = 0` keeps the derived budget.
    pub fn from_config(config: &Config) -> Self {
        let initial = Duration::from_secs(config.reconnect_delay);
        let mut backoff = Self::new(
            initial,
            Duration::from_secs(config.reconnect_max_delay.max(config.reconnect_delay)),
            config.reconnect_backoff_multiplier,
        );
        if config.max_reconnect_attempts > 0 {
            backoff.set_max_attempts(config.max_reconnect_attempts);
        }
        backoff
    }

    pub fn set_max_attempts(&mut self, max: u32) {
        self.max_attempts = Some(max);
    }

    /// Attempts until the delay saturates at `max_delay`. Never less than 1.
    pub fn derived_max_attempts(&self) -> u32 {
        if self.initial_delay >= self.max_delay || self.multiplier <= 1.0 {
            return 1;
        }
        let ratio = self.max_delay.as_secs_f64() / self.initial_delay.as_secs_f64();
        ratio.log(self.multiplier).floor() as u32 + 1
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the delay to wait before the next attempt and advances the schedule.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt += 1;
        let budget = self
            .max_attempts
            .unwrap_or_else(|| self.derived_max_attempts());
        if self.attempt > budget {
            return Err(BackoffError::MaxAttemptLimitError(budget));
        }

        let sleep = self.current_delay;
        let next = Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier);
        self.current_delay = next.min(self.max_delay);
        Ok(sleep)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    /// 1s, growing by 10% per attempt, capped at 60s.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 1.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4), 2.0);
        backoff.set_max_attempts(10);

        let delays: Vec<u64> = (0..5)
            .map(|_| backoff.next_sleep().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 4, 4]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);
        backoff.next_sleep().unwrap();
        backoff.next_sleep().unwrap();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_explicit_budget() {
        let mut backoff = Backoff::default();
        backoff.set_max_attempts(2);
        assert!(backoff.next_sleep().is_ok());
        assert!(backoff.next_sleep().is_ok());
        assert!(matches!(
            backoff.next_sleep(),
            Err(BackoffError::MaxAttemptLimitError(2))
        ));
    }

    #[test]
    fn test_derived_budget() {
        // 1 -> 2 -> 4 -> 8 reaches the cap after 3 doublings.
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 2.0);
        assert_eq!(backoff.derived_max_attempts(), 4);

        let flat = Backoff::new(Duration::from_secs(5), Duration::from_secs(5), 2.0);
        assert_eq!(flat.derived_max_attempts(), 1);
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            reconnect_delay: 1,
            reconnect_max_delay: 30,
            reconnect_backoff_multiplier: 2.0,
            max_reconnect_attempts: 3,
            ..Default::default()
        };
        let mut backoff = Backoff::from_config(&config);
        for _ in 0..3 {
            assert!(backoff.next_sleep().is_ok());
        }
        assert!(backoff.next_sleep().is_err());
    }
}
