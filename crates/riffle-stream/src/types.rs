use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RiffleError;

/// One step of a provider stream after mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta<V> {
    Item(V),
    Error(RiffleError),
}

impl<V> Delta<V> {
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Delta<U> {
        match self {
            Self::Item(value) => Delta::Item(f(value)),
            Self::Error(error) => Delta::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn into_result(self) -> Result<V, RiffleError> {
        match self {
            Self::Item(value) => Ok(value),
            Self::Error(error) => Err(error),
        }
    }
}

/// Best-effort structured value recovered from the text streamed so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialValue {
    pub partial: Value,
    #[serde(rename = "rawText")]
    pub raw_text: String,
    #[serde(rename = "textDelta")]
    pub text_delta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}
