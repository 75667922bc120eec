use std::sync::Arc;
use std::time::Duration;

use riffle_runtime::{
    CallOptions, FunctionType, MaxConcurrency, NoRetry, RiffleError, RiffleErrorCode, Run, Runtime,
    Tool, ToolCall, ToolCallsResponse, ToolFuture, ToolRegistry, execute_tool_calls, use_tools,
};
use serde_json::{Value, json};
use tokio::sync::Barrier;

fn add_tool() -> Tool {
    Tool::new(
        "add",
        "Add two numbers",
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["a", "b"]
        }),
        |args: Value, _options: CallOptions| -> ToolFuture {
            Box::pin(async move {
                let a = args["a"].as_f64().unwrap_or_default();
                let b = args["b"].as_f64().unwrap_or_default();
                Ok(json!(a + b))
            })
        },
    )
}

fn failing_tool() -> Tool {
    Tool::new(
        "explode",
        "Always fails",
        json!({ "type": "object" }),
        |_args: Value, _options: CallOptions| -> ToolFuture {
            Box::pin(async { Err(RiffleError::new(RiffleErrorCode::ProviderHttp, "kaboom")) })
        },
    )
}

fn rendezvous_tool(barrier: Arc<Barrier>) -> Tool {
    Tool::new(
        "rendezvous",
        "Waits for its sibling call",
        json!({ "type": "object" }),
        move |_args: Value, _options: CallOptions| -> ToolFuture {
            let barrier = Arc::clone(&barrier);
            Box::pin(async move {
                barrier.wait().await;
                Ok(json!("met"))
            })
        },
    )
}

fn test_runtime() -> Runtime {
    Runtime::builder().retry(Arc::new(NoRetry)).build()
}

#[tokio::test]
async fn failures_stay_isolated_and_results_keep_input_order() {
    let registry = ToolRegistry::new().with_tool(add_tool()).with_tool(failing_tool());
    let calls = vec![
        ToolCall::new("call-a", "explode", json!({})),
        ToolCall::new("call-b", "add", json!({ "a": 2, "b": 3 })),
        ToolCall::new("call-c", "missing", json!({})),
        ToolCall::new("call-d", "add", json!({ "a": "two" })),
    ];

    let results =
        execute_tool_calls(&test_runtime(), &CallOptions::new(), &registry, &calls).await;

    assert_eq!(results.len(), 4);
    let ids = results
        .iter()
        .map(|result| result.call.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["call-a", "call-b", "call-c", "call-d"]);
    assert_eq!(
        results.iter().map(|result| result.ok).collect::<Vec<_>>(),
        vec![false, true, false, false]
    );

    assert_eq!(results[0].result["code"], json!("tool_execution_failed"));
    assert_eq!(results[0].result["details"]["cause"]["message"], json!("kaboom"));
    assert_eq!(results[1].result, json!(5.0));
    assert_eq!(results[2].result["code"], json!("tool_not_found"));
    assert_eq!(
        results[2].result["message"],
        json!("No tool with name 'missing' found.")
    );
    assert_eq!(results[3].result["code"], json!("tool_arguments_invalid"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn calls_run_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let registry = ToolRegistry::new().with_tool(rendezvous_tool(barrier));
    let calls = vec![
        ToolCall::new("first", "rendezvous", json!({})),
        ToolCall::new("second", "rendezvous", json!({})),
    ];

    let runtime = test_runtime();
    let results = tokio::time::timeout(
        Duration::from_secs(5),
        execute_tool_calls(&runtime, &CallOptions::new(), &registry, &calls),
    )
    .await
    .expect("sequential execution would never reach the barrier");

    assert!(results.iter().all(|result| result.ok));
}

#[tokio::test]
async fn use_tools_nests_tool_calls_under_the_generation_call() {
    let run = Run::builder().build();
    let registry = ToolRegistry::new().with_tool(add_tool());
    let runtime = test_runtime();

    let output = use_tools(
        &runtime,
        &CallOptions::new().with_run(Arc::clone(&run)),
        &registry,
        json!({ "prompt": "add 1 and 2" }),
        |_options| async {
            Ok::<_, RiffleError>(ToolCallsResponse {
                text: Some("Adding now".to_string()),
                tool_calls: vec![ToolCall::new("call-1", "add", json!({ "a": 1, "b": 2 }))],
            })
        },
    )
    .await
    .expect("use_tools should succeed");

    assert_eq!(output.text.as_deref(), Some("Adding now"));
    assert_eq!(output.tool_results.len(), 1);
    assert!(output.tool_results[0].ok);
    assert_eq!(output.tool_results[0].result, json!(3.0));

    let events = run.events();
    assert_eq!(events.len(), 4);
    let outer = events[0].context();
    let inner = events[1].context();
    assert_eq!(outer.function_type, FunctionType::UseTools);
    assert_eq!(inner.function_type, FunctionType::ExecuteTool);
    assert_eq!(inner.parent_call_id.as_deref(), Some(outer.call_id.as_str()));
}

#[tokio::test]
async fn use_tools_surfaces_generation_failures() {
    let registry = ToolRegistry::new();
    let error = use_tools(
        &test_runtime(),
        &CallOptions::new(),
        &registry,
        json!(null),
        |_options| async {
            Err::<ToolCallsResponse, _>(RiffleError::new(
                RiffleErrorCode::ProviderProtocol,
                "malformed tool call",
            ))
        },
    )
    .await
    .expect_err("generation failed");

    assert_eq!(error.code, RiffleErrorCode::ProviderProtocol);
}

#[tokio::test]
async fn nested_tool_calls_do_not_wait_on_the_parent_throttle() {
    let throttle = Arc::new(MaxConcurrency::new(1).expect("valid limit"));
    let runtime = Runtime::builder()
        .retry(Arc::new(NoRetry))
        .throttle(throttle.clone())
        .build();
    let registry = ToolRegistry::new().with_tool(add_tool());

    let output = tokio::time::timeout(
        Duration::from_secs(5),
        use_tools(
            &runtime,
            &CallOptions::new(),
            &registry,
            json!({ "prompt": "add twice" }),
            |_options| async {
                Ok::<_, RiffleError>(ToolCallsResponse {
                    text: None,
                    tool_calls: vec![
                        ToolCall::new("call-1", "add", json!({ "a": 1, "b": 2 })),
                        ToolCall::new("call-2", "add", json!({ "a": 3, "b": 4 })),
                    ],
                })
            },
        ),
    )
    .await
    .expect("nested tool calls should not block on the held permit")
    .expect("use_tools should succeed");

    assert!(output.tool_results.iter().all(|result| result.ok));
    assert_eq!(output.tool_results[1].result, json!(7.0));
    assert_eq!(throttle.available_permits(), 1);
}
