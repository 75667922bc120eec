use std::future::Future;
use std::sync::Arc;

use riffle_stream::{
    DeferredValue, Delta, PartialValue, QueueCursor, ReplayQueue, RiffleError, Schema, parse_json,
    parse_partial_json, repair_json,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::adapter::StreamAdapter;
use crate::context::{CallContext, CallOptions, FunctionType};
use crate::lifecycle::StreamProcessor;
use crate::runtime::Runtime;

/// Live partial values plus the validated final value of a structured stream.
pub struct StructureStream<T> {
    pub partials: ReplayQueue<PartialValue>,
    pub value: DeferredValue<T>,
    pub metadata: CallContext,
}

/// Streams a structured value, emitting a [`PartialValue`] each time the
/// best-effort parse of the accumulated text changes.
///
/// The final item is always emitted. Once the stream closes, its raw text is
/// validated against `schema` to settle [`StructureStream::value`]; the
/// partial stream itself is unaffected by validation.
pub async fn stream_structure<A, T, S>(
    runtime: &Runtime,
    options: &CallOptions,
    adapter: Arc<A>,
    schema: Arc<S>,
    input: Value,
) -> Result<StructureStream<T>, RiffleError>
where
    A: StreamAdapter + 'static,
    T: Clone + Send + Sync + 'static,
    S: Schema<T> + 'static,
{
    let call_input = json!({
        "schema": schema.json_schema(),
        "input": input,
    });
    let establishing = Arc::clone(&adapter);
    let response = runtime
        .execute_stream(
            options,
            FunctionType::StreamStructure,
            call_input,
            move |call_options| establishing.establish(call_options),
            StructureProcessor::new(adapter),
        )
        .await?;

    let value = DeferredValue::new();
    tokio::spawn(settle_structure(
        response.value.cursor(),
        schema,
        value.clone(),
    ));
    Ok(StructureStream {
        partials: response.value,
        value,
        metadata: response.metadata,
    })
}

/// One-shot structured generation: `generate` returns JSON text, which is
/// parsed and validated as part of the call.
pub async fn generate_structure<T, S, F, Fut>(
    runtime: &Runtime,
    options: &CallOptions,
    schema: &S,
    input: Value,
    mut generate: F,
) -> Result<T, RiffleError>
where
    T: Serialize,
    S: Schema<T>,
    F: FnMut(CallOptions) -> Fut,
    Fut: Future<Output = Result<String, RiffleError>>,
{
    let call_input = json!({
        "schema": schema.json_schema(),
        "input": input,
    });
    runtime
        .execute(
            options,
            FunctionType::GenerateStructure,
            call_input,
            |call_options| {
                let text = generate(call_options);
                async move {
                    let text = text.await?;
                    schema.validate(&parse_json(&text)?)
                }
            },
        )
        .await
}

struct StructureProcessor<A> {
    adapter: Arc<A>,
    raw_text: String,
    text_delta: String,
    last_repaired: Option<String>,
    last_candidate: Option<Value>,
    emissions: usize,
}

impl<A> StructureProcessor<A> {
    fn new(adapter: Arc<A>) -> Self {
        Self {
            adapter,
            raw_text: String::new(),
            text_delta: String::new(),
            last_repaired: None,
            last_candidate: None,
            emissions: 0,
        }
    }

    /// `Some` when the accumulated text parses to a value that differs from
    /// the last emitted one.
    fn next_candidate(&mut self) -> Option<PartialValue> {
        let repaired = repair_json(&self.raw_text);
        if self.last_repaired.as_deref() == Some(repaired.as_str()) {
            return None;
        }
        let candidate = serde_json::from_str::<Value>(&repaired).ok();
        self.last_repaired = Some(repaired);

        let candidate = candidate?;
        if self.last_candidate.as_ref() == Some(&candidate) {
            return None;
        }
        self.last_candidate = Some(candidate.clone());
        Some(self.emit(Some(candidate)))
    }

    fn emit(&mut self, candidate: Option<Value>) -> PartialValue {
        self.emissions += 1;
        PartialValue {
            partial: candidate.unwrap_or(Value::Null),
            raw_text: self.raw_text.clone(),
            text_delta: std::mem::take(&mut self.text_delta),
        }
    }
}

impl<A> StreamProcessor<A::Event> for StructureProcessor<A>
where
    A: StreamAdapter + 'static,
{
    type Output = PartialValue;

    fn process(&mut self, event: A::Event) -> Option<Delta<PartialValue>> {
        let chunk = match self.adapter.map_event(event)? {
            Delta::Item(chunk) => chunk,
            Delta::Error(error) => return Some(Delta::Error(error)),
        };
        let fragment = self.adapter.extract_text(&chunk)?;
        if fragment.is_empty() {
            return None;
        }
        self.raw_text.push_str(&fragment);
        self.text_delta.push_str(&fragment);
        self.next_candidate().map(Delta::Item)
    }

    fn finish(&mut self) -> Option<PartialValue> {
        let candidate = self.last_candidate.clone();
        Some(self.emit(candidate))
    }

    fn on_error(&mut self, error: &RiffleError) {
        debug!(
            error_code = ?error.code,
            emissions = self.emissions,
            "structured stream ended with error"
        );
    }

    fn summary(&self) -> Value {
        json!({
            "value": self.last_candidate,
            "rawText": self.raw_text,
            "emissions": self.emissions,
        })
    }
}

async fn settle_structure<T, S>(
    mut cursor: QueueCursor<PartialValue>,
    schema: Arc<S>,
    value: DeferredValue<T>,
) where
    T: Clone,
    S: Schema<T>,
{
    let mut last = None;
    while let Some(item) = cursor.next().await {
        match item {
            Ok(partial) => last = Some(partial),
            Err(error) => {
                value.reject(error);
                return;
            }
        }
    }

    let raw_text = last.map(|partial| partial.raw_text).unwrap_or_default();
    let result = match parse_partial_json(&raw_text) {
        Some(candidate) => schema.validate(&candidate),
        None => Err(RiffleError::json_parse(
            &raw_text,
            "no JSON value could be recovered from the streamed text",
        )),
    };
    match result {
        Ok(validated) => {
            value.resolve(validated);
        }
        Err(error) => {
            warn!(
                error_code = ?error.code,
                error = error.message.as_str(),
                "streamed structure failed validation"
            );
            value.reject(error);
        }
    }
}
