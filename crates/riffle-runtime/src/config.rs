use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use riffle_stream::RiffleError;
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::retry::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY_MS, DEFAULT_JITTER, DEFAULT_MAX_DELAY_MS,
    DEFAULT_MAX_TRIES, ExponentialBackoff, NoRetry, RetryPolicyRef,
};
use crate::throttle::{MaxConcurrency, RateLimit, ThrottleRef, Unthrottled};

/// Process-wide defaults, usually loaded from a TOML file:
///
/// ```toml
/// log_format = "basic-text"
///
/// [retry]
/// max_tries = 5
/// initial_delay_ms = 500
///
/// [throttle]
/// max_concurrency = 4
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub log_format: LogFormat,
    pub retry: RetrySettings,
    pub throttle: ThrottleSettings,
}

impl RuntimeSettings {
    pub fn from_toml_str(text: &str) -> Result<Self, RiffleError> {
        toml::from_str(text).map_err(|error| {
            RiffleError::invalid_config(format!("Invalid runtime settings: {error}"))
        })
    }

    pub fn load(path: &Path) -> Result<Self, RiffleError> {
        let text = std::fs::read_to_string(path).map_err(|error| {
            RiffleError::invalid_config(format!(
                "Failed to read runtime settings from {}: {error}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_tries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetrySettings {
    pub fn build(&self) -> Result<RetryPolicyRef, RiffleError> {
        if self.max_tries == 0 {
            return Err(RiffleError::invalid_config("retry.max_tries must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(RiffleError::invalid_config(
                "retry.backoff_factor must be a finite number >= 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(RiffleError::invalid_config(
                "retry.jitter must be between 0 and 1",
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(RiffleError::invalid_config(
                "retry.max_delay_ms must not be below retry.initial_delay_ms",
            ));
        }

        if self.max_tries == 1 {
            return Ok(Arc::new(NoRetry));
        }
        Ok(Arc::new(
            ExponentialBackoff::new()
                .with_max_tries(self.max_tries)
                .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
                .with_backoff_factor(self.backoff_factor)
                .with_max_delay(Duration::from_millis(self.max_delay_ms))
                .with_jitter(self.jitter),
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    pub max_concurrency: Option<usize>,
    pub requests_per_second: Option<u32>,
}

impl ThrottleSettings {
    pub fn build(&self) -> Result<ThrottleRef, RiffleError> {
        match (self.max_concurrency, self.requests_per_second) {
            (Some(_), Some(_)) => Err(RiffleError::invalid_config(
                "throttle accepts either max_concurrency or requests_per_second, not both",
            )),
            (Some(limit), None) => Ok(Arc::new(MaxConcurrency::new(limit)?)),
            (None, Some(rate)) => Ok(Arc::new(RateLimit::per_second(rate)?)),
            (None, None) => Ok(Arc::new(Unthrottled)),
        }
    }
}
