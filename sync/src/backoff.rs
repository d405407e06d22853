//! Exponential backoff with down-jitter for failed sync rounds.

use std::time::Duration;

/// Largest usable jitter factor. Below one half, the shortest delay after
/// failure `n + 1` still exceeds the longest after failure `n`.
pub const MAX_JITTER_FACTOR: f64 = 0.49;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Down-jitter factor (0.25 = up to 25% reduction), clamped to
    /// [`MAX_JITTER_FACTOR`].
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let step = failures.saturating_sub(1).min(30);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(step as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        // Multiply by a random factor in [1 - jitter_factor, 1.0].
        let jitter = 1.0 - rand::random::<f64>() * self.jitter_factor.clamp(0.0, MAX_JITTER_FACTOR);
        Duration::from_secs_f64(capped * jitter)
    }
}
