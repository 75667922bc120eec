use std::future::Future;
use std::marker::PhantomData;
use std::time::Instant;

use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use riffle_stream::{Delta, ReplayQueue, RiffleError};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::abort::AbortSignal;
use crate::context::{CallContext, CallOptions, FunctionType};
use crate::event::{CallOutcome, EventDispatcher, LifecycleEvent};
use crate::resilience::run_resilient;
use crate::runtime::{ResolvedCall, Runtime};

/// Upstream events as produced by a provider.
pub type RawStream<E> = BoxStream<'static, E>;

/// Maps upstream events into deltas for one streaming call.
pub trait StreamProcessor<E>: Send + 'static {
    type Output: Clone + Send + Sync + 'static;

    fn process(&mut self, event: E) -> Option<Delta<Self::Output>>;

    /// Final item pushed after upstream ends normally.
    fn finish(&mut self) -> Option<Self::Output> {
        None
    }

    fn on_error(&mut self, _error: &RiffleError) {}

    /// Value reported in the success event.
    fn summary(&self) -> Value {
        Value::Null
    }
}

/// [`StreamProcessor`] from a plain mapping closure.
pub struct MapProcessor<F, V> {
    map: F,
    _output: PhantomData<fn() -> V>,
}

pub fn map_deltas<E, V, F>(map: F) -> MapProcessor<F, V>
where
    F: FnMut(E) -> Option<Delta<V>> + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    MapProcessor {
        map,
        _output: PhantomData,
    }
}

impl<E, V, F> StreamProcessor<E> for MapProcessor<F, V>
where
    F: FnMut(E) -> Option<Delta<V>> + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Output = V;

    fn process(&mut self, event: E) -> Option<Delta<V>> {
        (self.map)(event)
    }
}

pub struct StreamResponse<V> {
    pub value: ReplayQueue<V>,
    pub metadata: CallContext,
}

pub(crate) struct ActiveCall {
    pub(crate) context: CallContext,
    pub(crate) signal: Option<AbortSignal>,
    policy: ResolvedCall,
    started: Instant,
}

impl ActiveCall {
    fn start(
        runtime: &Runtime,
        options: &CallOptions,
        function_type: FunctionType,
        input: Value,
    ) -> Self {
        let policy = runtime.resolve(options);
        let call = Self {
            context: CallContext::new(function_type, options),
            signal: policy.signal.clone(),
            policy,
            started: Instant::now(),
        };
        debug!(
            call_id = call.context.call_id.as_str(),
            function_type = call.context.function_type.as_str(),
            parent_call_id = ?call.context.parent_call_id,
            "call started"
        );
        call.dispatcher().dispatch(&LifecycleEvent::Started {
            context: call.context.clone(),
            input,
        });
        call
    }

    fn dispatcher(&self) -> &EventDispatcher {
        &self.policy.dispatcher
    }

    fn finish(&self, outcome: CallOutcome) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        debug!(
            call_id = self.context.call_id.as_str(),
            function_type = self.context.function_type.as_str(),
            status = outcome.status(),
            duration_ms,
            "call finished"
        );
        self.dispatcher().dispatch(&LifecycleEvent::Finished {
            context: self.context.clone(),
            outcome,
            duration_ms,
            finished_at: Utc::now(),
        });
    }

    async fn run<T, F, Fut>(&self, operation: F) -> Result<T, RiffleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RiffleError>>,
    {
        run_resilient(
            self.policy.throttle.as_ref(),
            self.policy.retry.as_ref(),
            self.signal.as_ref(),
            operation,
        )
        .await
    }
}

impl Runtime {
    /// Runs a one-shot operation as a call: emits `Started`, runs `operation`
    /// through throttling and retry, then emits exactly one `Finished`.
    ///
    /// `operation` receives options for nested calls, parented to this one.
    pub async fn execute<T, F, Fut>(
        &self,
        options: &CallOptions,
        function_type: FunctionType,
        input: Value,
        mut operation: F,
    ) -> Result<T, RiffleError>
    where
        T: Serialize,
        F: FnMut(CallOptions) -> Fut,
        Fut: Future<Output = Result<T, RiffleError>>,
    {
        let call = ActiveCall::start(self, options, function_type, input);
        let child_options = options.child_of(&call.context);

        match call.run(|| operation(child_options.clone())).await {
            Ok(value) => {
                let summary = serde_json::to_value(&value).unwrap_or(Value::Null);
                call.finish(CallOutcome::Success { value: summary });
                Ok(value)
            }
            Err(error) => {
                call.finish(CallOutcome::from_error(&error));
                Err(error)
            }
        }
    }

    /// Establishes an upstream stream (with throttling and retry) and pumps it
    /// into a [`ReplayQueue`] on a spawned tokio task.
    ///
    /// The queue reaches its terminal state before the `Finished` event is
    /// emitted. Establishment failures are returned directly.
    pub async fn execute_stream<E, P, S, Fut>(
        &self,
        options: &CallOptions,
        function_type: FunctionType,
        input: Value,
        mut start_stream: S,
        processor: P,
    ) -> Result<StreamResponse<P::Output>, RiffleError>
    where
        E: Send + 'static,
        P: StreamProcessor<E>,
        S: FnMut(CallOptions) -> Fut,
        Fut: Future<Output = Result<RawStream<E>, RiffleError>>,
    {
        let call = ActiveCall::start(self, options, function_type, input);
        let child_options = options.child_of(&call.context);

        let upstream = match call.run(|| start_stream(child_options.clone())).await {
            Ok(upstream) => upstream,
            Err(error) => {
                call.finish(CallOutcome::from_error(&error));
                return Err(error);
            }
        };
        debug!(
            call_id = call.context.call_id.as_str(),
            "stream established"
        );

        let queue = ReplayQueue::new();
        let metadata = call.context.clone();
        tokio::spawn(pump_stream(call, upstream, processor, queue.clone()));
        Ok(StreamResponse {
            value: queue,
            metadata,
        })
    }
}

enum Pumped<E> {
    Event(E),
    Ended,
    Aborted,
}

async fn next_event<E>(upstream: &mut RawStream<E>, signal: Option<&AbortSignal>) -> Pumped<E> {
    let Some(signal) = signal else {
        return upstream.next().await.map_or(Pumped::Ended, Pumped::Event);
    };
    tokio::select! {
        biased;
        _ = signal.cancelled() => Pumped::Aborted,
        event = upstream.next() => event.map_or(Pumped::Ended, Pumped::Event),
    }
}

async fn pump_stream<E, P>(
    call: ActiveCall,
    mut upstream: RawStream<E>,
    mut processor: P,
    queue: ReplayQueue<P::Output>,
) where
    E: Send + 'static,
    P: StreamProcessor<E>,
{
    let failure = loop {
        match next_event(&mut upstream, call.signal.as_ref()).await {
            Pumped::Event(event) => match processor.process(event) {
                Some(Delta::Item(value)) => {
                    queue.push(value);
                }
                Some(Delta::Error(error)) => break Some(error),
                None => {}
            },
            Pumped::Ended => break None,
            Pumped::Aborted => break Some(RiffleError::aborted()),
        }
    };
    drop(upstream);

    match failure {
        None => {
            if let Some(value) = processor.finish() {
                queue.push(value);
            }
            queue.close();
            call.finish(CallOutcome::Success {
                value: processor.summary(),
            });
        }
        Some(error) => {
            if !error.is_aborted() {
                warn!(
                    call_id = call.context.call_id.as_str(),
                    error_code = ?error.code,
                    error = error.message.as_str(),
                    "stream failed"
                );
            }
            processor.on_error(&error);
            queue.fail(error.clone());
            call.finish(CallOutcome::from_error(&error));
        }
    }
}
