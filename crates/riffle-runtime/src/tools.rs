use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use riffle_stream::{RiffleError, RiffleErrorCode, ToolCall, validate_tool_arguments};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::context::{CallOptions, FunctionType};
use crate::runtime::Runtime;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, RiffleError>> + Send>>;

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// `options` are parented to the tool's own call.
    async fn execute(&self, args: Value, options: CallOptions) -> Result<Value, RiffleError>;
}

#[async_trait]
impl<F> ToolExecutor for F
where
    F: Fn(Value, CallOptions) -> ToolFuture + Send + Sync + 'static,
{
    async fn execute(&self, args: Value, options: CallOptions) -> Result<Value, RiffleError> {
        (self)(args, options).await
    }
}

pub type ToolExecuteFn = Arc<dyn ToolExecutor>;

#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub execute: ToolExecuteFn,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        execute: impl ToolExecutor + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            execute: Arc::new(execute),
        }
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool`, returning any tool previously registered under the
    /// same name.
    pub fn register(&mut self, tool: Tool) -> Option<Tool> {
        self.tools.insert(tool.name.clone(), tool)
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self.tools.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResult {
    pub call: ToolCall,
    pub ok: bool,
    /// Tool output when `ok`, otherwise the serialized error.
    pub result: Value,
}

impl ToolCallResult {
    fn success(call: &ToolCall, result: Value) -> Self {
        Self {
            call: call.clone(),
            ok: true,
            result,
        }
    }

    fn failure(call: &ToolCall, error: &RiffleError) -> Self {
        Self {
            call: call.clone(),
            ok: false,
            result: serde_json::to_value(error)
                .unwrap_or_else(|_| Value::String(error.to_string())),
        }
    }
}

/// Runs one tool as its own `execute-tool` call.
pub async fn execute_tool(
    runtime: &Runtime,
    options: &CallOptions,
    tool: &Tool,
    args: Value,
) -> Result<Value, RiffleError> {
    let input = json!({ "toolName": tool.name, "args": args });
    runtime
        .execute(options, FunctionType::ExecuteTool, input, |call_options| {
            let execute = Arc::clone(&tool.execute);
            let args = args.clone();
            let tool_name = tool.name.clone();
            async move {
                execute
                    .execute(args, call_options)
                    .await
                    .map_err(|error| tool_execution_error(&tool_name, error))
            }
        })
        .await
}

fn tool_execution_error(tool_name: &str, error: RiffleError) -> RiffleError {
    if error.is_aborted() {
        return error;
    }
    RiffleError::new(
        RiffleErrorCode::ToolExecutionFailed,
        format!("Tool '{tool_name}' failed: {}", error.message),
    )
    .with_details(json!({
        "toolName": tool_name,
        "cause": error,
    }))
}

fn tool_not_found_error(registry: &ToolRegistry, call: &ToolCall) -> RiffleError {
    RiffleError::new(
        RiffleErrorCode::ToolNotFound,
        format!("No tool with name '{}' found.", call.name),
    )
    .with_details(json!({
        "toolName": call.name,
        "toolCallId": call.id,
        "availableTools": registry.names(),
    }))
}

async fn execute_tool_call(
    runtime: &Runtime,
    options: &CallOptions,
    registry: &ToolRegistry,
    call: &ToolCall,
) -> ToolCallResult {
    let Some(tool) = registry.get(&call.name) else {
        let error = tool_not_found_error(registry, call);
        warn!(tool_call_id = call.id.as_str(), tool_name = call.name.as_str(), "tool not found");
        return ToolCallResult::failure(call, &error);
    };

    let args = match validate_tool_arguments(&tool.name, &tool.parameters, call) {
        Ok(args) => args,
        Err(error) => {
            warn!(
                tool_call_id = call.id.as_str(),
                tool_name = call.name.as_str(),
                error_code = ?error.code,
                "tool arguments rejected"
            );
            return ToolCallResult::failure(call, &error);
        }
    };

    match execute_tool(runtime, options, tool, args).await {
        Ok(result) => {
            debug!(tool_call_id = call.id.as_str(), tool_name = call.name.as_str(), "tool call succeeded");
            ToolCallResult::success(call, result)
        }
        Err(error) => ToolCallResult::failure(call, &error),
    }
}

/// Runs every call concurrently. Failures are captured per call and results
/// keep the order of `calls`.
pub async fn execute_tool_calls(
    runtime: &Runtime,
    options: &CallOptions,
    registry: &ToolRegistry,
    calls: &[ToolCall],
) -> Vec<ToolCallResult> {
    join_all(
        calls
            .iter()
            .map(|call| execute_tool_call(runtime, options, registry, call)),
    )
    .await
}

/// Model output for a tool-using step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, rename = "toolCalls")]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UseToolsOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "toolResults")]
    pub tool_results: Vec<ToolCallResult>,
}

/// Asks `generate` for tool calls, then runs them nested under this
/// `use-tools` call.
///
/// Only generation is retried; tool failures end up in the results.
pub async fn use_tools<F, Fut>(
    runtime: &Runtime,
    options: &CallOptions,
    registry: &ToolRegistry,
    input: Value,
    mut generate: F,
) -> Result<UseToolsOutput, RiffleError>
where
    F: FnMut(CallOptions) -> Fut,
    Fut: Future<Output = Result<ToolCallsResponse, RiffleError>>,
{
    runtime
        .execute(options, FunctionType::UseTools, input, |call_options| {
            let response = generate(call_options.clone());
            async move {
                let response = response.await?;
                let tool_results =
                    execute_tool_calls(runtime, &call_options, registry, &response.tool_calls)
                        .await;
                Ok(UseToolsOutput {
                    text: response.text,
                    tool_results,
                })
            }
        })
        .await
}
