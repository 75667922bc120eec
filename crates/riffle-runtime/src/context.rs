use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abort::AbortSignal;
use crate::event::ObserverRef;
use crate::logging::LogFormat;
use crate::retry::RetryPolicyRef;
use crate::run::Run;
use crate::throttle::{ThrottleRef, Unthrottled};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FunctionType {
    ExecuteFunction,
    GenerateText,
    StreamText,
    GenerateStructure,
    StreamStructure,
    ExecuteTool,
    UseTools,
}

impl FunctionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExecuteFunction => "execute-function",
            Self::GenerateText => "generate-text",
            Self::StreamText => "stream-text",
            Self::GenerateStructure => "generate-structure",
            Self::StreamStructure => "stream-structure",
            Self::ExecuteTool => "execute-tool",
            Self::UseTools => "use-tools",
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one call in the call tree. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallContext {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_call_id: Option<String>,
    pub function_type: FunctionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl CallContext {
    pub(crate) fn new(function_type: FunctionType, options: &CallOptions) -> Self {
        let run = options.run.as_deref();
        Self {
            call_id: format!("call-{}", uuid::Uuid::new_v4()),
            parent_call_id: options.parent_call_id.clone(),
            function_type,
            function_id: options.function_id.clone(),
            run_id: run.map(|run| run.run_id().to_string()),
            session_id: run.and_then(|run| run.session_id().map(str::to_string)),
            user_id: run.and_then(|run| run.user_id().map(str::to_string)),
            started_at: Utc::now(),
        }
    }
}

/// Per-call settings. Anything left unset falls back to the run, then to
/// the runtime defaults.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub function_id: Option<String>,
    pub parent_call_id: Option<String>,
    pub run: Option<Arc<Run>>,
    pub observers: Vec<ObserverRef>,
    pub log_format: Option<LogFormat>,
    pub abort_signal: Option<AbortSignal>,
    pub retry: Option<RetryPolicyRef>,
    pub throttle: Option<ThrottleRef>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function_id(mut self, function_id: impl Into<String>) -> Self {
        self.function_id = Some(function_id.into());
        self
    }

    pub fn with_run(mut self, run: Arc<Run>) -> Self {
        self.run = Some(run);
        self
    }

    pub fn with_observer(mut self, observer: ObserverRef) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = Some(log_format);
        self
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicyRef) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleRef) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Options for work nested under `parent`. Observers, run, log format
    /// and abort signal carry over; retry overrides do not.
    ///
    /// Nested calls are already admitted through the parent's throttle, so
    /// they run unthrottled unless the caller sets one explicitly.
    pub fn child_of(&self, parent: &CallContext) -> Self {
        Self {
            function_id: self.function_id.clone(),
            parent_call_id: Some(parent.call_id.clone()),
            run: self.run.clone(),
            observers: self.observers.clone(),
            log_format: self.log_format,
            abort_signal: self.abort_signal.clone(),
            retry: None,
            throttle: Some(Arc::new(Unthrottled)),
        }
    }

    /// The call's own signal, else the run's.
    pub fn effective_abort_signal(&self) -> Option<AbortSignal> {
        self.abort_signal.clone().or_else(|| {
            self.run
                .as_ref()
                .and_then(|run| run.abort_signal().cloned())
        })
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("function_id", &self.function_id)
            .field("parent_call_id", &self.parent_call_id)
            .field("run_id", &self.run.as_ref().map(|run| run.run_id()))
            .field("observers", &self.observers.len())
            .field("log_format", &self.log_format)
            .field("abort_signal", &self.abort_signal)
            .finish_non_exhaustive()
    }
}
