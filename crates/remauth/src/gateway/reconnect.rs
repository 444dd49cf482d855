//! Reconnection configuration and exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Maximum number of reconnection attempts (None = infinite).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Upper bound of the delay for the given attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let multiplier = self.backoff_multiplier.powi(exponent);
        let delay_millis = self.initial_delay.as_millis() as f64 * multiplier;
        if !delay_millis.is_finite() || delay_millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_millis as u64)
    }

    /// Full-jitter delay: uniform in `[0, delay_for_attempt(attempt)]`.
    #[must_use]
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.delay_for_attempt(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(0..=ceiling))
    }

    /// Check if we should attempt reconnection.
    #[must_use]
    pub const fn should_reconnect(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Attempt counter for consecutive failed connections.
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Start with no failed attempts.
    #[must_use]
    pub const fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Number of consecutive failures recorded.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` when the attempt budget is spent.
    pub fn next_delay(&mut self, config: &ReconnectConfig) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        if !config.should_reconnect(self.attempt) {
            return None;
        }
        Some(config.jittered_delay(self.attempt, &mut rand::thread_rng()))
    }

    /// Forget past failures (called on every successful `hello`).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` if the wait was interrupted.
pub async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancel.cancelled() => false,
    }
}
