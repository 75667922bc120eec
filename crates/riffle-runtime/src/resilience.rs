use std::future::Future;
use std::time::Duration;

use riffle_stream::RiffleError;
use tracing::{debug, warn};

use crate::abort::AbortSignal;
use crate::retry::{GiveUpReason, RetryDecision, RetryPolicy};
use crate::throttle::{Throttle, ThrottlePermit};

/// Runs `operation` under throttle admission and retry, honoring `signal`.
///
/// The throttle permit is held across every attempt and backoff. Permanent
/// failures are returned unchanged; running out of attempts on transient
/// failures yields a `RetryExhausted` error listing each attempt's error.
pub async fn run_resilient<T, F, Fut>(
    throttle: &dyn Throttle,
    retry: &dyn RetryPolicy,
    signal: Option<&AbortSignal>,
    mut operation: F,
) -> Result<T, RiffleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RiffleError>>,
{
    ensure_not_aborted(signal)?;
    let _permit = admit(throttle, signal).await?;

    let mut errors = Vec::new();
    let mut attempt = 0u32;
    loop {
        ensure_not_aborted(signal)?;
        attempt += 1;

        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };
        if error.is_aborted() || is_aborted(signal) {
            debug!(attempt, "operation aborted");
            return Err(RiffleError::aborted());
        }

        match retry.decide(&error, attempt) {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    attempt,
                    max_tries = retry.max_tries(),
                    delay_ms = delay.as_millis() as u64,
                    error_code = ?error.code,
                    error = error.message.as_str(),
                    "operation attempt failed; scheduling retry"
                );
                errors.push(error);
                wait_backoff_or_abort(delay, signal).await?;
            }
            RetryDecision::GiveUp(GiveUpReason::NotRetryable) => {
                debug!(attempt, error_code = ?error.code, "operation failed with permanent error");
                return Err(error);
            }
            RetryDecision::GiveUp(GiveUpReason::MaxTriesExceeded) => {
                if errors.is_empty() {
                    return Err(error);
                }
                errors.push(error);
                warn!(attempt, "operation retries exhausted");
                return Err(RiffleError::retry_exhausted(errors));
            }
        }
    }
}

fn is_aborted(signal: Option<&AbortSignal>) -> bool {
    signal.is_some_and(AbortSignal::is_aborted)
}

fn ensure_not_aborted(signal: Option<&AbortSignal>) -> Result<(), RiffleError> {
    if is_aborted(signal) {
        return Err(RiffleError::aborted());
    }
    Ok(())
}

async fn admit(
    throttle: &dyn Throttle,
    signal: Option<&AbortSignal>,
) -> Result<ThrottlePermit, RiffleError> {
    let Some(signal) = signal else {
        return Ok(throttle.acquire().await);
    };
    tokio::select! {
        biased;
        _ = signal.cancelled() => Err(RiffleError::aborted()),
        permit = throttle.acquire() => Ok(permit),
    }
}

async fn wait_backoff_or_abort(
    delay: Duration,
    signal: Option<&AbortSignal>,
) -> Result<(), RiffleError> {
    if delay.is_zero() {
        return ensure_not_aborted(signal);
    }

    if let Some(signal) = signal {
        tokio::select! {
            _ = signal.cancelled() => return Err(RiffleError::aborted()),
            _ = tokio::time::sleep(delay) => {}
        }
    } else {
        tokio::time::sleep(delay).await;
    }
    Ok(())
}
