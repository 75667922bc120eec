//! Call lifecycle, resilience and streaming generators built on top of
//! `riffle-stream`.

mod abort;
mod adapter;
mod config;
mod context;
mod event;
mod lifecycle;
mod logging;
mod resilience;
mod retry;
mod run;
mod runtime;
mod structured;
mod text;
mod throttle;
mod tools;

pub use abort::{AbortController, AbortSignal};
pub use adapter::{
    ClosureStreamAdapter, EstablishFn, EstablishFuture, ExtractTextFn, MapEventFn, StreamAdapter,
};
pub use config::{RetrySettings, RuntimeSettings, ThrottleSettings};
pub use context::{CallContext, CallOptions, FunctionType};
pub use event::{CallOutcome, LifecycleEvent, Observer, ObserverRef};
pub use lifecycle::{MapProcessor, RawStream, StreamProcessor, StreamResponse, map_deltas};
pub use logging::{LogFormat, TracingObserver, basic_text_line};
pub use resilience::run_resilient;
pub use retry::{
    ExponentialBackoff, GiveUpReason, NoRetry, RetryDecision, RetryPolicy, RetryPolicyRef,
};
pub use run::{Run, RunBuilder};
pub use runtime::{Runtime, RuntimeBuilder};
pub use structured::{StructureStream, generate_structure, stream_structure};
pub use text::{TextStream, generate_text, stream_text};
pub use throttle::{MaxConcurrency, RateLimit, Throttle, ThrottlePermit, ThrottleRef, Unthrottled};
pub use tools::{
    Tool, ToolCallResult, ToolCallsResponse, ToolExecuteFn, ToolExecutor, ToolFuture, ToolRegistry,
    UseToolsOutput, execute_tool, execute_tool_calls, use_tools,
};

pub use riffle_stream::{
    DeferredValue, Delta, ErrorKind, JsonSchema, PartialValue, QueueCursor, ReplayQueue,
    RiffleError, RiffleErrorCode, Schema, ToolCall, parse_partial_json, repair_json,
};
