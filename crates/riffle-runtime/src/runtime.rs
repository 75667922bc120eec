use std::fmt;
use std::sync::Arc;

use riffle_stream::RiffleError;

use crate::abort::AbortSignal;
use crate::config::RuntimeSettings;
use crate::context::CallOptions;
use crate::event::{EventDispatcher, ObserverRef};
use crate::logging::{LogFormat, TracingObserver};
use crate::retry::{ExponentialBackoff, RetryPolicyRef};
use crate::throttle::{ThrottleRef, Unthrottled};

/// Process-wide defaults and global observers. Built once and passed to
/// every call; cloning shares the same state.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    observers: Vec<ObserverRef>,
    log_format: LogFormat,
    retry: RetryPolicyRef,
    throttle: ThrottleRef,
}

/// Policies resolved for a single call: call options, then run, then
/// runtime defaults.
pub(crate) struct ResolvedCall {
    pub(crate) retry: RetryPolicyRef,
    pub(crate) throttle: ThrottleRef,
    pub(crate) signal: Option<AbortSignal>,
    pub(crate) dispatcher: EventDispatcher,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Result<Self, RiffleError> {
        Ok(Self::builder()
            .log_format(settings.log_format)
            .retry(settings.retry.build()?)
            .throttle(settings.throttle.build()?)
            .build())
    }

    pub fn log_format(&self) -> LogFormat {
        self.inner.log_format
    }

    pub(crate) fn resolve(&self, options: &CallOptions) -> ResolvedCall {
        let run = options.run.as_ref();
        let retry = options
            .retry
            .clone()
            .or_else(|| run.and_then(|run| run.retry().cloned()))
            .unwrap_or_else(|| Arc::clone(&self.inner.retry));
        let throttle = options
            .throttle
            .clone()
            .or_else(|| run.and_then(|run| run.throttle().cloned()))
            .unwrap_or_else(|| Arc::clone(&self.inner.throttle));
        let log_format = options
            .log_format
            .or_else(|| run.and_then(|run| run.log_format()))
            .unwrap_or(self.inner.log_format);

        let mut observers = Vec::new();
        observers.extend(TracingObserver::for_format(log_format));
        observers.extend(self.inner.observers.iter().cloned());
        observers.extend(options.observers.iter().cloned());

        ResolvedCall {
            retry,
            throttle,
            signal: options.effective_abort_signal(),
            dispatcher: EventDispatcher::new(observers, options.run.clone()),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("observers", &self.inner.observers.len())
            .field("log_format", &self.inner.log_format)
            .field("retry_max_tries", &self.inner.retry.max_tries())
            .field("throttle", &self.inner.throttle.name())
            .finish()
    }
}

#[derive(Default)]
pub struct RuntimeBuilder {
    observers: Vec<ObserverRef>,
    log_format: LogFormat,
    retry: Option<RetryPolicyRef>,
    throttle: Option<ThrottleRef>,
}

impl RuntimeBuilder {
    pub fn observer(mut self, observer: ObserverRef) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    pub fn retry(mut self, retry: RetryPolicyRef) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn throttle(mut self, throttle: ThrottleRef) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(RuntimeInner {
                observers: self.observers,
                log_format: self.log_format,
                retry: self
                    .retry
                    .unwrap_or_else(|| Arc::new(ExponentialBackoff::default())),
                throttle: self.throttle.unwrap_or_else(|| Arc::new(Unthrottled)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::NoRetry;
    use crate::run::Run;
    use crate::throttle::MaxConcurrency;

    #[test]
    fn call_overrides_beat_run_overrides_beat_defaults() {
        let runtime = Runtime::builder().log_format(LogFormat::BasicText).build();
        let resolved = runtime.resolve(&CallOptions::new());
        assert_eq!(resolved.retry.max_tries(), 3);
        assert_eq!(resolved.throttle.name(), "unthrottled");

        let run = Run::builder()
            .retry(Arc::new(NoRetry))
            .throttle(Arc::new(MaxConcurrency::new(1).expect("valid")))
            .build();
        let from_run = runtime.resolve(&CallOptions::new().with_run(Arc::clone(&run)));
        assert_eq!(from_run.retry.max_tries(), 1);
        assert_eq!(from_run.throttle.name(), "max-concurrency");

        let from_call = runtime.resolve(
            &CallOptions::new()
                .with_run(run)
                .with_retry(Arc::new(ExponentialBackoff::new().with_max_tries(7))),
        );
        assert_eq!(from_call.retry.max_tries(), 7);
        assert_eq!(from_call.throttle.name(), "max-concurrency");
    }

    #[test]
    fn builds_from_settings() {
        let settings = RuntimeSettings::from_toml_str("[throttle]\nrequests_per_second = 10")
            .expect("valid settings");
        let runtime = Runtime::from_settings(&settings).expect("valid runtime");
        assert_eq!(runtime.resolve(&CallOptions::new()).throttle.name(), "rate-limit");
    }
}
