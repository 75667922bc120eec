use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use riffle_stream::RiffleError;

pub const DEFAULT_MAX_TRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
pub const DEFAULT_JITTER: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    NotRetryable,
    MaxTriesExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp(GiveUpReason),
}

/// Decides, after a failed attempt, whether and when to try again.
/// `attempt` is 1-based and counts the attempt that just failed.
pub trait RetryPolicy: Send + Sync {
    fn decide(&self, error: &RiffleError, attempt: u32) -> RetryDecision;

    fn max_tries(&self) -> u32;
}

pub type RetryPolicyRef = Arc<dyn RetryPolicy>;

fn give_up(error: &RiffleError) -> RetryDecision {
    if error.is_retryable() {
        RetryDecision::GiveUp(GiveUpReason::MaxTriesExceeded)
    } else {
        RetryDecision::GiveUp(GiveUpReason::NotRetryable)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn decide(&self, error: &RiffleError, _attempt: u32) -> RetryDecision {
        give_up(error)
    }

    fn max_tries(&self) -> u32 {
        1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    max_tries: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries.max(1);
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        if backoff_factor.is_finite() && backoff_factor >= 1.0 {
            self.backoff_factor = backoff_factor;
        }
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Fraction of each delay that is randomized away, clamped to `[0, 1]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Delay before the attempt following `attempt`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - self.jitter)..=1.0);
        delay.mul_f64(factor)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, error: &RiffleError, attempt: u32) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_tries {
            return give_up(error);
        }
        RetryDecision::RetryAfter(self.jittered(self.base_delay(attempt)))
    }

    fn max_tries(&self) -> u32 {
        self.max_tries
    }
}
