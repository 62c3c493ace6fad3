//! Bounded exponential backoff with jitter.
//!
//! Used by reconnect loops that must never give up but must also never wait
//! longer than a configured ceiling:
//!
//! - [`BackoffConfig`]: initial delay, ceiling, jitter factor
//! - [`calculate_backoff_delay`]: the pure delay formula
//! - [`Backoff`]: attempt-tracking state for one loop

use std::time::Duration;

use rand::Rng;

/// Default delay before the first retry in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
/// Default ceiling on any single delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Parameters for exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// No delay ever exceeds this.
    pub max_delay: Duration,
    /// Jitter range as a fraction of the delay (0.0–1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

/// Calculate the delay for a zero-based `attempt`.
///
/// Formula: `min(max, initial * 2^attempt) * (1 + (random * 2 - 1) * jitter)`,
/// clamped to `max` so jitter never pushes a delay past the ceiling.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG.
#[must_use]
pub fn calculate_backoff_delay(config: &BackoffConfig, attempt: u32, random: f64) -> Duration {
    let initial_ms = config.initial_delay.as_millis() as u64;
    let max_ms = config.max_delay.as_millis() as u64;

    let exponential = initial_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * config.jitter_factor.clamp(0.0, 1.0);
    let with_jitter = (capped as f64 * jitter).round().max(0.0) as u64;

    Duration::from_millis(with_jitter.min(max_ms))
}

/// Attempt-tracking backoff state for one retry loop.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Start a fresh backoff sequence.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay to wait before the next attempt, with random jitter.
    pub fn next_delay(&mut self) -> Duration {
        let random: f64 = rand::rng().random();
        self.next_delay_with_random(random)
    }

    /// Delay to wait before the next attempt, with caller-supplied jitter.
    pub fn next_delay_with_random(&mut self, random: f64) -> Duration {
        let delay = calculate_backoff_delay(&self.config, self.attempt, random);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Restart the sequence after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The configuration this backoff was built with.
    #[must_use]
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
