use std::future::Future;
use std::sync::Arc;

use riffle_stream::{DeferredValue, Delta, QueueCursor, ReplayQueue, RiffleError};
use serde_json::{Value, json};

use crate::adapter::StreamAdapter;
use crate::context::{CallContext, CallOptions, FunctionType};
use crate::lifecycle::StreamProcessor;
use crate::runtime::Runtime;

pub struct TextStream {
    pub deltas: ReplayQueue<String>,
    pub text: DeferredValue<String>,
    pub metadata: CallContext,
}

pub async fn generate_text<F, Fut>(
    runtime: &Runtime,
    options: &CallOptions,
    input: Value,
    generate: F,
) -> Result<String, RiffleError>
where
    F: FnMut(CallOptions) -> Fut,
    Fut: Future<Output = Result<String, RiffleError>>,
{
    runtime
        .execute(options, FunctionType::GenerateText, input, generate)
        .await
}

/// Streams text fragments; [`TextStream::text`] settles with the full text
/// once the stream ends.
pub async fn stream_text<A>(
    runtime: &Runtime,
    options: &CallOptions,
    adapter: Arc<A>,
    input: Value,
) -> Result<TextStream, RiffleError>
where
    A: StreamAdapter + 'static,
{
    let establishing = Arc::clone(&adapter);
    let response = runtime
        .execute_stream(
            options,
            FunctionType::StreamText,
            input,
            move |call_options| establishing.establish(call_options),
            TextProcessor {
                adapter,
                text: String::new(),
            },
        )
        .await?;

    let text = DeferredValue::new();
    tokio::spawn(settle_text(response.value.cursor(), text.clone()));
    Ok(TextStream {
        deltas: response.value,
        text,
        metadata: response.metadata,
    })
}

struct TextProcessor<A> {
    adapter: Arc<A>,
    text: String,
}

impl<A> StreamProcessor<A::Event> for TextProcessor<A>
where
    A: StreamAdapter + 'static,
{
    type Output = String;

    fn process(&mut self, event: A::Event) -> Option<Delta<String>> {
        let chunk = match self.adapter.map_event(event)? {
            Delta::Item(chunk) => chunk,
            Delta::Error(error) => return Some(Delta::Error(error)),
        };
        let fragment = self.adapter.extract_text(&chunk)?;
        if fragment.is_empty() {
            return None;
        }
        self.text.push_str(&fragment);
        Some(Delta::Item(fragment))
    }

    fn summary(&self) -> Value {
        json!({ "text": self.text })
    }
}

async fn settle_text(mut cursor: QueueCursor<String>, text: DeferredValue<String>) {
    let mut full = String::new();
    while let Some(item) = cursor.next().await {
        match item {
            Ok(fragment) => full.push_str(&fragment),
            Err(error) => {
                text.reject(error);
                return;
            }
        }
    }
    text.resolve(full);
}
