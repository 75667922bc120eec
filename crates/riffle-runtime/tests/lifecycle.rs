use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use riffle_runtime::{
    AbortController, CallOptions, CallOutcome, ExponentialBackoff, FunctionType, LifecycleEvent,
    LogFormat, MaxConcurrency, Observer, ObserverRef, RiffleError, RiffleErrorCode, Run, Runtime,
};
use serde_json::json;

fn recording_observer() -> (ObserverRef, Arc<Mutex<Vec<LifecycleEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let observer: ObserverRef = Arc::new(move |event: &LifecycleEvent| {
        sink.lock().expect("events lock").push(event.clone());
    });
    (observer, events)
}

fn fast_retry(max_tries: u32) -> Arc<ExponentialBackoff> {
    Arc::new(
        ExponentialBackoff::new()
            .with_max_tries(max_tries)
            .with_initial_delay(Duration::ZERO)
            .with_jitter(0.0),
    )
}

fn test_runtime(observer: ObserverRef) -> Runtime {
    Runtime::builder()
        .observer(observer)
        .retry(fast_retry(3))
        .build()
}

fn outcome(event: &LifecycleEvent) -> &CallOutcome {
    match event {
        LifecycleEvent::Finished { outcome, .. } => outcome,
        LifecycleEvent::Started { .. } => panic!("expected finished event"),
    }
}

#[tokio::test]
async fn one_shot_call_emits_paired_events() {
    let (observer, events) = recording_observer();
    let runtime = test_runtime(observer);

    let value = runtime
        .execute(
            &CallOptions::new().with_function_id("double"),
            FunctionType::ExecuteFunction,
            json!({ "n": 21 }),
            |_options| async { Ok::<_, RiffleError>(42) },
        )
        .await
        .expect("call should succeed");
    assert_eq!(value, 42);

    let events = events.lock().expect("events lock").clone();
    assert_eq!(events.len(), 2);
    assert!(events[0].is_started());
    assert!(!events[1].is_started());
    assert_eq!(events[0].context().call_id, events[1].context().call_id);
    assert_eq!(events[0].context().function_id.as_deref(), Some("double"));
    assert!(events[1].timestamp() >= events[0].timestamp());
    assert_eq!(outcome(&events[1]), &CallOutcome::Success { value: json!(42) });

    let LifecycleEvent::Started { input, .. } = &events[0] else {
        panic!("expected started event");
    };
    assert_eq!(input, &json!({ "n": 21 }));
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let (observer, events) = recording_observer();
    let runtime = test_runtime(observer);
    let attempts = AtomicUsize::new(0);

    let error = runtime
        .execute(
            &CallOptions::new(),
            FunctionType::ExecuteFunction,
            json!(null),
            |_options| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RiffleError::new(RiffleErrorCode::ProviderHttp, "400")) }
            },
        )
        .await
        .expect_err("call should fail");

    assert_eq!(error.code, RiffleErrorCode::ProviderHttp);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    let events = events.lock().expect("events lock").clone();
    assert!(matches!(outcome(&events[1]), CallOutcome::Error { error } if error.message == "400"));
}

#[tokio::test]
async fn exhausted_retries_report_every_attempt() {
    let (observer, events) = recording_observer();
    let runtime = test_runtime(observer);
    let attempts = AtomicUsize::new(0);

    let error = runtime
        .execute(
            &CallOptions::new(),
            FunctionType::ExecuteFunction,
            json!(null),
            |_options| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(RiffleError::transport(format!("reset #{attempt}"))) }
            },
        )
        .await
        .expect_err("call should fail");

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(error.code, RiffleErrorCode::RetryExhausted);
    let details = error.details.clone().expect("details");
    assert_eq!(details["reason"], json!("maxTriesExceeded"));
    assert_eq!(details["errors"].as_array().map(Vec::len), Some(3));
    assert_eq!(details["errors"][2]["message"], json!("reset #3"));

    let events = events.lock().expect("events lock").clone();
    assert_eq!(events.len(), 2);
    assert_eq!(outcome(&events[1]), &CallOutcome::Error { error });
}

#[tokio::test]
async fn pre_signalled_abort_makes_no_attempts() {
    let (observer, events) = recording_observer();
    let runtime = test_runtime(observer);
    let controller = AbortController::new();
    controller.abort();
    let attempts = AtomicUsize::new(0);

    let error = runtime
        .execute(
            &CallOptions::new().with_abort_signal(controller.signal()),
            FunctionType::ExecuteFunction,
            json!(null),
            |_options| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, RiffleError>(()) }
            },
        )
        .await
        .expect_err("call should abort");

    assert!(error.is_aborted());
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    let events = events.lock().expect("events lock").clone();
    assert_eq!(events.len(), 2);
    assert_eq!(outcome(&events[1]), &CallOutcome::Aborted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn max_concurrency_serialises_calls_and_releases_on_error() {
    let throttle = Arc::new(MaxConcurrency::new(1).expect("valid limit"));
    let runtime = Runtime::builder()
        .retry(fast_retry(1))
        .throttle(throttle.clone())
        .build();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks = (0..4)
        .map(|index| {
            let runtime = runtime.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                runtime
                    .execute(
                        &CallOptions::new(),
                        FunctionType::ExecuteFunction,
                        json!(index),
                        |_options| {
                            let in_flight = Arc::clone(&in_flight);
                            let peak = Arc::clone(&peak);
                            async move {
                                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(current, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(10)).await;
                                in_flight.fetch_sub(1, Ordering::SeqCst);
                                if index % 2 == 0 {
                                    Err(RiffleError::new(RiffleErrorCode::ProviderHttp, "boom"))
                                } else {
                                    Ok(index)
                                }
                            }
                        },
                    )
                    .await
            })
        })
        .collect::<Vec<_>>();

    let mut failures = 0;
    for task in tasks {
        if task.await.expect("task should join").is_err() {
            failures += 1;
        }
    }

    assert_eq!(failures, 2);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(throttle.available_permits(), 1);
}

struct FailingObserver;

impl Observer for FailingObserver {
    fn on_event(&self, _event: &LifecycleEvent) -> Result<(), RiffleError> {
        Err(RiffleError::new(RiffleErrorCode::Serialization, "observer broke"))
    }
}

#[tokio::test]
async fn observer_failures_and_panics_do_not_break_the_call() {
    let (observer, events) = recording_observer();
    let panicking: ObserverRef = Arc::new(|_event: &LifecycleEvent| panic!("observer panic"));
    let runtime = Runtime::builder()
        .observer(panicking)
        .observer(Arc::new(FailingObserver))
        .observer(observer)
        .build();

    let value = runtime
        .execute(
            &CallOptions::new(),
            FunctionType::ExecuteFunction,
            json!(null),
            |_options| async { Ok::<_, RiffleError>("done") },
        )
        .await
        .expect("observers must not break the call");

    assert_eq!(value, "done");
    assert_eq!(events.lock().expect("events lock").len(), 2);
}

#[tokio::test]
async fn run_records_nested_calls_with_parent_ids() {
    let (call_observer, call_events) = recording_observer();
    let (run_observer, run_observed) = recording_observer();
    let run = Run::builder()
        .session_id("session-7")
        .user_id("user-3")
        .observer(run_observer)
        .build();
    let runtime = test_runtime(call_observer);
    let runtime_ref = &runtime;

    let options = CallOptions::new().with_run(Arc::clone(&run));
    runtime
        .execute(
            &options,
            FunctionType::UseTools,
            json!(null),
            |child_options| async move {
                runtime_ref
                    .execute(
                        &child_options,
                        FunctionType::ExecuteTool,
                        json!({ "toolName": "noop" }),
                        |_options| async { Ok::<_, RiffleError>(json!("ok")) },
                    )
                    .await
            },
        )
        .await
        .expect("nested calls should succeed");

    let recorded = run.events();
    assert_eq!(recorded.len(), 4);
    assert_eq!(run_observed.lock().expect("events lock").len(), 4);
    assert_eq!(call_events.lock().expect("events lock").len(), 4);

    let parent = recorded[0].context().clone();
    let child = recorded[1].context().clone();
    assert_eq!(parent.function_type, FunctionType::UseTools);
    assert_eq!(child.function_type, FunctionType::ExecuteTool);
    assert_eq!(child.parent_call_id.as_deref(), Some(parent.call_id.as_str()));
    assert_eq!(child.run_id.as_deref(), Some(run.run_id()));
    assert_eq!(child.session_id.as_deref(), Some("session-7"));
    assert_eq!(child.user_id.as_deref(), Some("user-3"));

    // Inner call finishes before the outer one.
    assert_eq!(recorded[2].context().call_id, child.call_id);
    assert_eq!(recorded[3].context().call_id, parent.call_id);
}

#[tokio::test]
async fn run_abort_signal_applies_to_calls_in_the_run() {
    let controller = AbortController::new();
    let run = Run::builder().abort_signal(controller.signal()).build();
    let runtime = Runtime::builder().retry(fast_retry(3)).build();
    controller.abort();

    let error = runtime
        .execute(
            &CallOptions::new().with_run(Arc::clone(&run)),
            FunctionType::GenerateText,
            json!(null),
            |_options| async { Ok::<_, RiffleError>("never") },
        )
        .await
        .expect_err("run is aborted");

    assert!(error.is_aborted());
    let recorded = run.events();
    assert_eq!(recorded.len(), 2);
    assert_eq!(outcome(&recorded[1]), &CallOutcome::Aborted);
}

#[tokio::test]
async fn every_log_format_renders_without_failing_the_call() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    for format in [
        LogFormat::Off,
        LogFormat::BasicText,
        LogFormat::DetailedObject,
        LogFormat::DetailedJson,
    ] {
        let runtime = Runtime::builder().log_format(format).build();
        let value = runtime
            .execute(
                &CallOptions::new().with_function_id("log-check"),
                FunctionType::GenerateText,
                json!({ "format": format }),
                |_options| async { Ok::<_, RiffleError>("logged".to_string()) },
            )
            .await
            .expect("logging must not fail the call");
        assert_eq!(value, "logged");
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Forecast {
    city: String,
    celsius: i32,
}

#[tokio::test]
async fn one_shot_text_and_structure_generation() {
    let (observer, events) = recording_observer();
    let runtime = test_runtime(observer);

    let text = riffle_runtime::generate_text(
        &runtime,
        &CallOptions::new(),
        json!({ "prompt": "greet" }),
        |_options| async { Ok("hi there".to_string()) },
    )
    .await
    .expect("text generation succeeds");
    assert_eq!(text, "hi there");

    let schema = riffle_runtime::JsonSchema::<Forecast>::new(json!({
        "type": "object",
        "properties": {
            "city": { "type": "string" },
            "celsius": { "type": "integer" }
        },
        "required": ["city", "celsius"]
    }))
    .expect("schema should compile");

    let forecast = riffle_runtime::generate_structure(
        &runtime,
        &CallOptions::new(),
        &schema,
        json!({ "prompt": "weather" }),
        |_options| async { Ok(r#"{"city": "Oslo", "celsius": -3}"#.to_string()) },
    )
    .await
    .expect("structure generation succeeds");
    assert_eq!(
        forecast,
        Forecast {
            city: "Oslo".to_string(),
            celsius: -3,
        }
    );

    let error = riffle_runtime::generate_structure(
        &runtime,
        &CallOptions::new(),
        &schema,
        json!(null),
        |_options| async { Ok("{\"city\": ".to_string()) },
    )
    .await
    .expect_err("truncated JSON is rejected");
    assert_eq!(error.code, RiffleErrorCode::JsonParse);

    let function_types = events
        .lock()
        .expect("events lock")
        .iter()
        .filter(|event| event.is_started())
        .map(|event| event.context().function_type)
        .collect::<Vec<_>>();
    assert_eq!(
        function_types,
        vec![
            FunctionType::GenerateText,
            FunctionType::GenerateStructure,
            FunctionType::GenerateStructure,
        ]
    );
}
