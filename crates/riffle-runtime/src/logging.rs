use std::sync::Arc;

use chrono::SecondsFormat;
use riffle_stream::{RiffleError, RiffleErrorCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::event::{LifecycleEvent, Observer, ObserverRef};

/// How the built-in observer renders lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Off,
    BasicText,
    DetailedObject,
    DetailedJson,
}

/// Emits lifecycle events through `tracing::info!`.
#[derive(Debug, Clone, Copy)]
pub struct TracingObserver {
    format: LogFormat,
}

impl TracingObserver {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    /// `None` for [`LogFormat::Off`].
    pub fn for_format(format: LogFormat) -> Option<ObserverRef> {
        match format {
            LogFormat::Off => None,
            format => Some(Arc::new(Self::new(format))),
        }
    }
}

impl Observer for TracingObserver {
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), RiffleError> {
        match self.format {
            LogFormat::Off => {}
            LogFormat::BasicText => info!("{}", basic_text_line(event)),
            LogFormat::DetailedObject => info!(?event, "lifecycle event"),
            LogFormat::DetailedJson => {
                let json = serde_json::to_string(event).map_err(|error| {
                    RiffleError::new(
                        RiffleErrorCode::Serialization,
                        format!("Failed to serialize lifecycle event: {error}"),
                    )
                })?;
                info!(event = %json, "lifecycle event");
            }
        }
        Ok(())
    }
}

/// `[timestamp] call-id (function-id) - function-type event-type [in Nms]`
pub fn basic_text_line(event: &LifecycleEvent) -> String {
    let context = event.context();
    let timestamp = event
        .timestamp()
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let function_id = context
        .function_id
        .as_deref()
        .map(|id| format!(" ({id})"))
        .unwrap_or_default();
    let mut line = format!(
        "[{timestamp}] {}{function_id} - {} {}",
        context.call_id,
        context.function_type,
        event.event_type()
    );
    if let LifecycleEvent::Finished { duration_ms, .. } = event {
        line.push_str(&format!(" in {duration_ms}ms"));
    }
    line
}
