use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use riffle_stream::RiffleError;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::context::CallContext;
use crate::run::Run;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    Success { value: Value },
    Error { error: RiffleError },
    Aborted,
}

impl CallOutcome {
    pub(crate) fn from_error(error: &RiffleError) -> Self {
        if error.is_aborted() {
            Self::Aborted
        } else {
            Self::Error {
                error: error.clone(),
            }
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
            Self::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "eventType", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started {
        context: CallContext,
        input: Value,
    },
    Finished {
        context: CallContext,
        outcome: CallOutcome,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(rename = "finishedAt")]
        finished_at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn context(&self) -> &CallContext {
        match self {
            Self::Started { context, .. } | Self::Finished { context, .. } => context,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Finished { .. } => "finished",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Started { context, .. } => context.started_at,
            Self::Finished { finished_at, .. } => *finished_at,
        }
    }
}

pub trait Observer: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), RiffleError>;
}

impl<F> Observer for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), RiffleError> {
        (self)(event);
        Ok(())
    }
}

pub type ObserverRef = Arc<dyn Observer>;

/// Fans one call's events out to every observer scope.
#[derive(Clone, Default)]
pub(crate) struct EventDispatcher {
    observers: Vec<ObserverRef>,
    run: Option<Arc<Run>>,
}

impl EventDispatcher {
    pub(crate) fn new(observers: Vec<ObserverRef>, run: Option<Arc<Run>>) -> Self {
        Self { observers, run }
    }

    pub(crate) fn dispatch(&self, event: &LifecycleEvent) {
        if let Some(run) = &self.run {
            run.record(event);
        }
        for observer in &self.observers {
            notify_observer(observer.as_ref(), event);
        }
    }
}

pub(crate) fn notify_observer(observer: &dyn Observer, event: &LifecycleEvent) {
    let call_id = event.context().call_id.as_str();
    match panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(
                call_id,
                event_type = event.event_type(),
                error_code = ?error.code,
                error = error.message.as_str(),
                "lifecycle observer failed"
            );
        }
        Err(_) => {
            warn!(
                call_id,
                event_type = event.event_type(),
                "lifecycle observer panicked"
            );
        }
    }
}
