use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::abort::AbortSignal;
use crate::event::{LifecycleEvent, ObserverRef, notify_observer};
use crate::logging::LogFormat;
use crate::retry::RetryPolicyRef;
use crate::throttle::ThrottleRef;

/// A group of related calls sharing ids, observers, overrides and an
/// optional abort signal. Every lifecycle event of its calls is recorded.
pub struct Run {
    run_id: String,
    session_id: Option<String>,
    user_id: Option<String>,
    abort_signal: Option<AbortSignal>,
    observers: Vec<ObserverRef>,
    log_format: Option<LogFormat>,
    retry: Option<RetryPolicyRef>,
    throttle: Option<ThrottleRef>,
    events: Mutex<Vec<LifecycleEvent>>,
}

impl Run {
    pub fn builder() -> RunBuilder {
        RunBuilder::default()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn abort_signal(&self) -> Option<&AbortSignal> {
        self.abort_signal.as_ref()
    }

    pub(crate) fn log_format(&self) -> Option<LogFormat> {
        self.log_format
    }

    pub(crate) fn retry(&self) -> Option<&RetryPolicyRef> {
        self.retry.as_ref()
    }

    pub(crate) fn throttle(&self) -> Option<&ThrottleRef> {
        self.throttle.as_ref()
    }

    /// Snapshot of every event recorded so far, in delivery order.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record(&self, event: &LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        for observer in &self.observers {
            notify_observer(observer.as_ref(), event);
        }
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("run_id", &self.run_id)
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("abort_signal", &self.abort_signal)
            .field("observers", &self.observers.len())
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct RunBuilder {
    run_id: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    abort_signal: Option<AbortSignal>,
    observers: Vec<ObserverRef>,
    log_format: Option<LogFormat>,
    retry: Option<RetryPolicyRef>,
    throttle: Option<ThrottleRef>,
}

impl RunBuilder {
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    pub fn observer(mut self, observer: ObserverRef) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = Some(log_format);
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

    pub fn build(self) -> Arc<Run> {
        Arc::new(Run {
            run_id: self
                .run_id
                .unwrap_or_else(|| format!("run-{}", uuid::Uuid::new_v4())),
            session_id: self.session_id,
            user_id: self.user_id,
            abort_signal: self.abort_signal,
            observers: self.observers,
            log_format: self.log_format,
            retry: self.retry,
            throttle: self.throttle,
            events: Mutex::new(Vec::new()),
        })
    }
}
