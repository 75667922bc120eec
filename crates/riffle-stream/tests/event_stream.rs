use std::time::Duration;

use futures_util::StreamExt;
use riffle_stream::{DeferredValue, ReplayQueue, RiffleError, RiffleErrorCode};

#[tokio::test]
async fn independent_cursors_replay_the_full_sequence() {
    let queue = ReplayQueue::new();
    let mut early = queue.cursor();

    queue.push("a".to_string());
    assert_eq!(early.next().await, Some(Ok("a".to_string())));

    queue.push("b".to_string());
    queue.push("c".to_string());
    queue.close();

    let mut late = queue.cursor();
    let mut replayed = Vec::new();
    while let Some(item) = late.next().await {
        replayed.push(item.expect("closed queue yields values"));
    }
    assert_eq!(replayed, vec!["a", "b", "c"]);

    assert_eq!(early.next().await, Some(Ok("b".to_string())));
    assert_eq!(early.next().await, Some(Ok("c".to_string())));
    assert_eq!(early.next().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_consumer_resumes_on_push_and_close() {
    let queue = ReplayQueue::new();
    let consumer = tokio::spawn({
        let queue = queue.clone();
        async move { queue.collect().await }
    });

    for value in 0..5 {
        tokio::time::sleep(Duration::from_millis(2)).await;
        queue.push(value);
    }
    queue.close();

    let values = consumer
        .await
        .expect("consumer task should join")
        .expect("queue closed normally");
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn stream_adapter_ends_after_failure() {
    let queue = ReplayQueue::new();
    queue.push(1);
    queue.push(2);
    queue.fail(RiffleError::new(RiffleErrorCode::ProviderProtocol, "bad frame"));

    let items = queue.clone().into_stream().collect::<Vec<_>>().await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0], Ok(1));
    assert_eq!(items[1], Ok(2));
    assert_eq!(
        items[2].as_ref().expect_err("terminal failure").code,
        RiffleErrorCode::ProviderProtocol
    );

    let error = queue.collect().await.expect_err("collect surfaces failure");
    assert_eq!(error.message, "bad frame");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deferred_value_wakes_every_waiter() {
    let deferred = DeferredValue::<String>::new();
    let waiters = (0..3)
        .map(|_| {
            let deferred = deferred.clone();
            tokio::spawn(async move { deferred.wait().await })
        })
        .collect::<Vec<_>>();

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(deferred.reject(RiffleError::aborted()));

    for waiter in waiters {
        let result = waiter.await.expect("waiter should join");
        assert!(result.expect_err("rejected").is_aborted());
    }
}
