//! Exponential backoff for reconnect and poll-error loops

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff calculator with jitter
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_delay_ms: u64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms;
        Self {
            config,
            current_delay_ms: initial,
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt. The first call returns the
    /// initial delay, later calls grow it up to the configured cap.
    pub fn next_delay(&mut self) -> Duration {
        let base = if self.attempt == 0 {
            self.config.initial_delay_ms as f64
        } else {
            self.current_delay_ms as f64 * self.config.multiplier
        };
        self.attempt += 1;

        let capped = base.min(self.config.max_delay_ms as f64);
        let delay = if self.config.jitter_factor > 0.0 {
            let range = capped * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-range..=range);
            (capped + jitter).max(1.0) as u64
        } else {
            capped.max(1.0) as u64
        };

        self.current_delay_ms = delay.min(self.config.max_delay_ms);
        Duration::from_millis(self.current_delay_ms)
    }

    pub fn reset(&mut self) {
        self.current_delay_ms = self.config.initial_delay_ms;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial: u64, max: u64, multiplier: f64) -> ExponentialBackoff {
        ExponentialBackoff::with_config(BackoffConfig {
            initial_delay_ms: initial,
            max_delay_ms: max,
            multiplier,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_starts_at_initial_and_grows() {
        let mut backoff = no_jitter(100, 10_000, 2.0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
    }

    #[test]
    fn test_caps_at_max() {
        let mut backoff = no_jitter(1000, 5000, 10.0);
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn test_reset() {
        let mut backoff = no_jitter(100, 10_000, 2.0);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 2000,
            multiplier: 4.0,
            jitter_factor: 0.5,
        });
        for _ in 0..10 {
            assert!(backoff.next_delay() <= Duration::from_millis(2000));
        }
    }
}
