//! Streaming primitives shared by the riffle runtime: replayable queues,
//! partial JSON repair, schema validation and the error taxonomy.

mod error;
mod event_stream;
mod partial_json;
mod types;
mod validation;

pub use error::{ErrorKind, RiffleError, RiffleErrorCode};
pub use event_stream::{DeferredValue, QueueCursor, ReplayQueue};
pub use partial_json::{parse_partial_json, repair_json};
pub use types::{Delta, PartialValue, ToolCall};
pub use validation::{JsonSchema, Schema, parse_json, validate_tool_arguments};
