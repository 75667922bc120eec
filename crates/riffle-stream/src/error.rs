use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiffleErrorCode {
    ProviderTransport,
    RateLimited,
    StreamClosed,
    ProviderHttp,
    ProviderProtocol,
    JsonParse,
    TypeValidation,
    SchemaInvalid,
    ToolNotFound,
    ToolArgumentsInvalid,
    ToolExecutionFailed,
    RetryExhausted,
    InvalidConfig,
    Serialization,
    Aborted,
}

/// Coarse classification used by retry policies and the lifecycle wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Aborted,
}

impl RiffleErrorCode {
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::ProviderTransport | Self::RateLimited | Self::StreamClosed => ErrorKind::Transient,
            Self::Aborted => ErrorKind::Aborted,
            Self::ProviderHttp
            | Self::ProviderProtocol
            | Self::JsonParse
            | Self::TypeValidation
            | Self::SchemaInvalid
            | Self::ToolNotFound
            | Self::ToolArgumentsInvalid
            | Self::ToolExecutionFailed
            | Self::RetryExhausted
            | Self::InvalidConfig
            | Self::Serialization => ErrorKind::Permanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct RiffleError {
    pub code: RiffleErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RiffleError {
    pub fn new(code: RiffleErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn aborted() -> Self {
        Self::new(RiffleErrorCode::Aborted, "Operation aborted")
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RiffleErrorCode::ProviderTransport, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(RiffleErrorCode::InvalidConfig, message)
    }

    /// Parse failure carrying the offending text under `details.text`.
    pub fn json_parse(text: &str, cause: impl std::fmt::Display) -> Self {
        Self::new(
            RiffleErrorCode::JsonParse,
            format!("JSON parsing failed: {cause}"),
        )
        .with_details(json!({ "text": text }))
    }

    pub fn retry_exhausted(errors: Vec<RiffleError>) -> Self {
        let attempts = errors.len();
        let last_message = errors
            .last()
            .map(|error| error.message.clone())
            .unwrap_or_default();
        Self::new(
            RiffleErrorCode::RetryExhausted,
            format!("Failed after {attempts} attempt(s). Last error: {last_message}"),
        )
        .with_details(json!({
            "reason": "maxTriesExceeded",
            "attempts": attempts,
            "errors": errors,
        }))
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_aborted(&self) -> bool {
        self.kind() == ErrorKind::Aborted
    }

    pub fn as_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"code\":\"serialization\",\"message\":\"{}\"}}",
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_codes_by_kind() {
        assert_eq!(RiffleErrorCode::RateLimited.kind(), ErrorKind::Transient);
        assert_eq!(RiffleErrorCode::StreamClosed.kind(), ErrorKind::Transient);
        assert_eq!(RiffleErrorCode::JsonParse.kind(), ErrorKind::Permanent);
        assert_eq!(RiffleErrorCode::RetryExhausted.kind(), ErrorKind::Permanent);
        assert!(RiffleError::aborted().is_aborted());
        assert!(RiffleError::transport("reset").is_retryable());
    }

    #[test]
    fn retry_exhausted_keeps_every_attempt_error() {
        let error = RiffleError::retry_exhausted(vec![
            RiffleError::transport("first"),
            RiffleError::transport("second"),
        ]);

        let details = error.details.expect("details");
        assert_eq!(details["reason"], json!("maxTriesExceeded"));
        assert_eq!(details["attempts"], json!(2));
        assert_eq!(details["errors"][1]["message"], json!("second"));
        assert!(error.message.ends_with("second"));
    }

    #[test]
    fn compact_json_omits_missing_details() {
        let error = RiffleError::new(RiffleErrorCode::ToolNotFound, "missing");
        assert_eq!(
            error.as_compact_json(),
            r#"{"code":"tool_not_found","message":"missing"}"#
        );
        assert_eq!(error.to_string(), "ToolNotFound: missing");
    }
}
