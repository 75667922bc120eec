use std::marker::PhantomData;

use jsonschema::JSONSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{RiffleError, RiffleErrorCode};
use crate::types::ToolCall;

/// Validates untyped JSON into a typed value.
pub trait Schema<T>: Send + Sync {
    fn json_schema(&self) -> &Value;

    fn validate(&self, value: &Value) -> Result<T, RiffleError>;
}

/// [`Schema`] backed by a compiled JSON schema and serde deserialization.
pub struct JsonSchema<T> {
    schema: Value,
    compiled: JSONSchema,
    _target: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    pub fn new(schema: Value) -> Result<Self, RiffleError> {
        let compiled = JSONSchema::compile(&schema).map_err(|error| {
            RiffleError::new(
                RiffleErrorCode::SchemaInvalid,
                format!("Invalid JSON schema: {error}"),
            )
        })?;
        Ok(Self {
            schema,
            compiled,
            _target: PhantomData,
        })
    }
}

impl<T: DeserializeOwned> Schema<T> for JsonSchema<T> {
    fn json_schema(&self) -> &Value {
        &self.schema
    }

    fn validate(&self, value: &Value) -> Result<T, RiffleError> {
        if let Err(errors) = self.compiled.validate(value) {
            let validation_errors = collect_validation_errors(errors);
            return Err(RiffleError::new(
                RiffleErrorCode::TypeValidation,
                "Value does not match the expected schema",
            )
            .with_details(json!({
                "value": value,
                "validationErrors": validation_errors,
            })));
        }

        serde_json::from_value(value.clone()).map_err(|error| {
            RiffleError::new(
                RiffleErrorCode::TypeValidation,
                format!("Value could not be converted: {error}"),
            )
            .with_details(json!({ "value": value }))
        })
    }
}

pub fn parse_json(text: &str) -> Result<Value, RiffleError> {
    serde_json::from_str(text).map_err(|error| RiffleError::json_parse(text, error))
}

pub fn validate_tool_arguments(
    tool_name: &str,
    parameters: &Value,
    tool_call: &ToolCall,
) -> Result<Value, RiffleError> {
    let compiled = JSONSchema::compile(parameters).map_err(|error| {
        RiffleError::new(
            RiffleErrorCode::SchemaInvalid,
            format!("Invalid JSON schema for tool '{tool_name}': {error}"),
        )
        .with_details(json!({
            "toolName": tool_name,
        }))
    })?;

    if let Err(errors) = compiled.validate(&tool_call.args) {
        let validation_errors = collect_validation_errors(errors);
        return Err(RiffleError::new(
            RiffleErrorCode::ToolArgumentsInvalid,
            format!("Validation failed for tool '{tool_name}'"),
        )
        .with_details(json!({
            "toolName": tool_name,
            "toolCallId": tool_call.id,
            "args": tool_call.args,
            "validationErrors": validation_errors,
        })));
    }

    Ok(tool_call.args.clone())
}

fn collect_validation_errors<'a>(
    errors: impl Iterator<Item = jsonschema::ValidationError<'a>>,
) -> Vec<Value> {
    errors
        .map(|error| {
            json!({
                "path": error.instance_path.to_string(),
                "message": error.to_string(),
            })
        })
        .collect()
}
