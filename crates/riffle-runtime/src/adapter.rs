use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use riffle_stream::{Delta, RiffleError};

use crate::context::CallOptions;
use crate::lifecycle::RawStream;

pub type EstablishFuture<E> = Pin<Box<dyn Future<Output = Result<RawStream<E>, RiffleError>> + Send>>;

/// Provider-specific half of a streaming call: opening the upstream stream
/// and turning its raw events into text-bearing chunks.
pub trait StreamAdapter: Send + Sync {
    type Event: Send + 'static;
    type Chunk: Send + 'static;

    fn establish(&self, options: CallOptions) -> EstablishFuture<Self::Event>;

    /// `None` skips events that carry nothing for the caller.
    fn map_event(&self, event: Self::Event) -> Option<Delta<Self::Chunk>>;

    fn extract_text(&self, chunk: &Self::Chunk) -> Option<String>;
}

pub type EstablishFn<E> = Arc<dyn Fn(CallOptions) -> EstablishFuture<E> + Send + Sync>;
pub type MapEventFn<E, C> = Arc<dyn Fn(E) -> Option<Delta<C>> + Send + Sync>;
pub type ExtractTextFn<C> = Arc<dyn Fn(&C) -> Option<String> + Send + Sync>;

pub struct ClosureStreamAdapter<E, C> {
    pub establish: EstablishFn<E>,
    pub map_event: MapEventFn<E, C>,
    pub extract_text: ExtractTextFn<C>,
}

impl<E, C> Clone for ClosureStreamAdapter<E, C> {
    fn clone(&self) -> Self {
        Self {
            establish: Arc::clone(&self.establish),
            map_event: Arc::clone(&self.map_event),
            extract_text: Arc::clone(&self.extract_text),
        }
    }
}

impl<E, C> ClosureStreamAdapter<E, C>
where
    E: Send + 'static,
    C: Send + 'static,
{
    pub fn new(
        establish: impl Fn(CallOptions) -> EstablishFuture<E> + Send + Sync + 'static,
        map_event: impl Fn(E) -> Option<Delta<C>> + Send + Sync + 'static,
        extract_text: impl Fn(&C) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            establish: Arc::new(establish),
            map_event: Arc::new(map_event),
            extract_text: Arc::new(extract_text),
        }
    }
}

impl<E, C> StreamAdapter for ClosureStreamAdapter<E, C>
where
    E: Send + 'static,
    C: Send + 'static,
{
    type Event = E;
    type Chunk = C;

    fn establish(&self, options: CallOptions) -> EstablishFuture<E> {
        (self.establish)(options)
    }

    fn map_event(&self, event: E) -> Option<Delta<C>> {
        (self.map_event)(event)
    }

    fn extract_text(&self, chunk: &C) -> Option<String> {
        (self.extract_text)(chunk)
    }
}
