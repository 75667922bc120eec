use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{self, Stream};
use tokio::sync::Notify;
use tracing::debug;

use crate::error::RiffleError;

enum Terminal {
    Closed,
    Failed(RiffleError),
}

struct QueueState<T> {
    items: Vec<T>,
    terminal: Option<Terminal>,
}

struct ReplayQueueInner<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

/// Append-only buffer with a terminal state that any number of cursors can
/// replay from the beginning.
///
/// The buffer is unbounded: every pushed value is retained until the last
/// clone of the queue is dropped, so producers must terminate in finite time.
pub struct ReplayQueue<T> {
    inner: Arc<ReplayQueueInner<T>>,
}

impl<T> Clone for ReplayQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ReplayQueue<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(ReplayQueueInner {
                state: Mutex::new(QueueState {
                    items: Vec::new(),
                    terminal: None,
                }),
                notify: Notify::new(),
            }),
        }
    }
}

impl<T: Clone> ReplayQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a value. Returns `false` (and drops the value) once the queue
    /// is closed or failed.
    pub fn push(&self, value: T) -> bool {
        {
            let mut state = self.state();
            if state.terminal.is_some() {
                debug!("dropping value pushed after replay queue terminated");
                return false;
            }
            state.items.push(value);
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn close(&self) {
        self.terminate(Terminal::Closed);
    }

    pub fn fail(&self, error: RiffleError) {
        self.terminate(Terminal::Failed(error));
    }

    fn terminate(&self, terminal: Terminal) {
        {
            let mut state = self.state();
            if state.terminal.is_some() {
                debug!("ignoring repeated termination of replay queue");
                return;
            }
            state.terminal = Some(terminal);
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_terminated(&self) -> bool {
        self.state().terminal.is_some()
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Independent cursor positioned at the first buffered value.
    pub fn cursor(&self) -> QueueCursor<T> {
        QueueCursor {
            queue: self.clone(),
            position: 0,
            finished: false,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T, RiffleError>> + Send + 'static
    where
        T: Send + 'static,
    {
        stream::unfold(self.cursor(), |mut cursor| async move {
            cursor.next().await.map(|item| (item, cursor))
        })
    }

    /// Waits for termination and returns every buffered value, or the
    /// failure the queue terminated with.
    pub async fn collect(&self) -> Result<Vec<T>, RiffleError> {
        let mut cursor = self.cursor();
        let mut values = Vec::new();
        while let Some(item) = cursor.next().await {
            values.push(item?);
        }
        Ok(values)
    }
}

pub struct QueueCursor<T> {
    queue: ReplayQueue<T>,
    position: usize,
    finished: bool,
}

impl<T: Clone> QueueCursor<T> {
    /// Next buffered value, suspending while the queue is open and this
    /// cursor is caught up. A failure is yielded once, then `None`.
    pub async fn next(&mut self) -> Option<Result<T, RiffleError>> {
        loop {
            if self.finished {
                return None;
            }

            // Registered before inspecting the buffer so a push between the
            // check and the await still wakes this cursor.
            let notified = self.queue.inner.notify.notified();
            {
                let state = self.queue.state();
                if let Some(item) = state.items.get(self.position) {
                    self.position += 1;
                    return Some(Ok(item.clone()));
                }
                match &state.terminal {
                    Some(Terminal::Closed) => {
                        self.finished = true;
                        return None;
                    }
                    Some(Terminal::Failed(error)) => {
                        self.finished = true;
                        return Some(Err(error.clone()));
                    }
                    None => {}
                }
            }
            notified.await;
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

struct DeferredInner<T> {
    slot: Mutex<Option<Result<T, RiffleError>>>,
    notify: Notify,
}

/// Single-assignment cell that any number of holders can await.
pub struct DeferredValue<T> {
    inner: Arc<DeferredInner<T>>,
}

impl<T> Clone for DeferredValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for DeferredValue<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(DeferredInner {
                slot: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }
}

impl<T: Clone> DeferredValue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, error: RiffleError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, result: Result<T, RiffleError>) -> bool {
        {
            let mut slot = self
                .inner
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn try_get(&self) -> Option<Result<T, RiffleError>> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_settled(&self) -> bool {
        self.try_get().is_some()
    }

    pub async fn wait(&self) -> Result<T, RiffleError> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(result) = self.try_get() {
                return result;
            }
            notified.await;
        }
    }
}
