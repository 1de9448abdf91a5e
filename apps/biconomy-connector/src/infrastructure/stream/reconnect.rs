//! Reconnect Backoff
//!
//! Delay schedule between user-stream connection attempts: exponential
//! growth from `initial_delay`, capped at `max_delay`, randomized by
//! `jitter_factor`. The schedule restarts once a connection reaches `Open`.

use std::time::Duration;

use rand::Rng;

/// Reconnect schedule parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of the un-jittered delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Randomization as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retries allowed in a row; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.1, 0)
    }
}

impl ReconnectConfig {
    /// Create a schedule.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
            max_attempts,
        }
    }
}

/// Stateful walk through a [`ReconnectConfig`] schedule.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Start at the first attempt.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return None;
        }
        let base = self.base_delay(self.attempts);
        self.attempts += 1;
        Some(self.jittered(base))
    }

    /// Forget previous failures.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let scaled = self.config.initial_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.config.max_delay.as_secs_f64() {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = rand::rng().random_range(-factor..=factor);
        delay.mul_f64((1.0 + spread).max(0.0))
    }
}
