//! Retry settings for transfer operations.

use std::time::Duration;

/// Retry settings for transient backend failures.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Maximum number of retry attempts.
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff multiplier (exponential backoff).
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Backoff delay before the given (1-based) retry attempt.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp: f64 = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms: f64 = (self.initial_backoff_ms as f64 * exp).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }
}
