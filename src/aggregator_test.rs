//! Unit tests for the instance-info aggregator.

use std::sync::Arc;

use tokio::time::Duration;
use tokio::time::timeout;

use crate::aggregator::Aggregator;
use crate::aggregator::InstanceInfo;
use crate::aggregator::MockInstanceGetter;
use crate::config::AggregatorConfig;
use crate::errors::BackingError;
use crate::errors::Error;

fn instance(id: &str) -> InstanceInfo {
    InstanceInfo {
        instance_id: id.into(),
        addresses: vec!["10.0.0.1".into()],
        status: Some("running".into()),
    }
}

fn config(
    gather_interval_ms: u64,
    max_batch_size: usize,
) -> AggregatorConfig {
    AggregatorConfig {
        gather_interval_ms,
        max_batch_size,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn bulk_error_is_broadcast_to_the_batch() {
    let mut getter = MockInstanceGetter::new();
    getter
        .expect_instances()
        .withf(|ids| ids == ["foo"])
        .times(1)
        .returning(|_| Err(BackingError::Instances("some error".into())));

    let (aggregator, handle) =
        Aggregator::new(Arc::new(getter), config(50, 100)).expect("valid config");
    let loop_task = tokio::spawn(aggregator.run());

    let err = handle.instance_info("foo").await.expect_err("bulk error must propagate");
    assert!(
        matches!(err, Error::Backing(BackingError::Instances(ref reason)) if reason == "some error"),
        "got {err:?}"
    );

    handle.stop();
    loop_task.await.expect("loop must not panic").expect("loop must stop cleanly");
}

#[tokio::test(start_paused = true)]
async fn requests_within_the_window_share_one_bulk_call() {
    let mut getter = MockInstanceGetter::new();
    getter
        .expect_instances()
        .withf(|ids| ids == ["a", "b"])
        .times(1)
        .returning(|ids| Ok(ids.iter().map(|id| Some(instance(id))).collect()));

    let (aggregator, handle) =
        Aggregator::new(Arc::new(getter), config(3000, 100)).expect("valid config");
    let loop_task = tokio::spawn(aggregator.run());

    let (a, b) = tokio::join!(handle.instance_info("a"), handle.instance_info("b"));
    assert_eq!(a.expect("a must resolve"), instance("a"));
    assert_eq!(b.expect("b must resolve"), instance("b"));

    handle.stop();
    loop_task.await.expect("loop must not panic").expect("loop must stop cleanly");
}

#[tokio::test(start_paused = true)]
async fn full_batch_flushes_before_the_window_closes() {
    let mut getter = MockInstanceGetter::new();
    getter
        .expect_instances()
        .withf(|ids| ids.len() == 2)
        .times(1)
        .returning(|ids| Ok(ids.iter().map(|id| Some(instance(id))).collect()));

    // The gather interval is far longer than the test timeout; only the
    // size trigger can flush.
    let (aggregator, handle) =
        Aggregator::new(Arc::new(getter), config(3_600_000, 2)).expect("valid config");
    let loop_task = tokio::spawn(aggregator.run());

    let results = timeout(
        Duration::from_secs(60),
        async { tokio::join!(handle.instance_info("a"), handle.instance_info("b")) },
    )
    .await
    .expect("batch must flush on size, not on the timer");
    results.0.expect("a must resolve");
    results.1.expect("b must resolve");

    handle.stop();
    loop_task.await.expect("loop must not panic").expect("loop must stop cleanly");
}

#[tokio::test(start_paused = true)]
async fn missing_instance_is_reported_not_found() {
    let mut getter = MockInstanceGetter::new();
    getter.expect_instances().times(1).returning(|_| Ok(vec![None]));

    let (aggregator, handle) =
        Aggregator::new(Arc::new(getter), config(50, 100)).expect("valid config");
    let loop_task = tokio::spawn(aggregator.run());

    let err = handle.instance_info("ghost").await.expect_err("missing id must fail");
    assert!(
        matches!(err, Error::Backing(BackingError::InstanceNotFound(ref id)) if id == "ghost"),
        "got {err:?}"
    );

    handle.stop();
    loop_task.await.expect("loop must not panic").expect("loop must stop cleanly");
}

#[tokio::test(start_paused = true)]
async fn short_reply_is_broadcast_as_an_error() {
    let mut getter = MockInstanceGetter::new();
    getter.expect_instances().times(1).returning(|_| Ok(vec![]));

    let (aggregator, handle) =
        Aggregator::new(Arc::new(getter), config(50, 100)).expect("valid config");
    let loop_task = tokio::spawn(aggregator.run());

    let err = handle.instance_info("foo").await.expect_err("short reply must fail");
    assert!(matches!(err, Error::Backing(BackingError::Instances(_))), "got {err:?}");

    handle.stop();
    loop_task.await.expect("loop must not panic").expect("loop must stop cleanly");
}

#[tokio::test(start_paused = true)]
async fn stop_answers_pending_requests_with_the_stop_error() {
    // No expectation on the getter: stopping must not issue a bulk call.
    let getter = MockInstanceGetter::new();

    let (aggregator, handle) =
        Aggregator::new(Arc::new(getter), config(3_600_000, 100)).expect("valid config");
    let loop_task = tokio::spawn(aggregator.run());

    let handle = Arc::new(handle);
    let pending = tokio::spawn({
        let handle = handle.clone();
        async move { handle.instance_info("foo").await }
    });

    tokio::task::yield_now().await;
    handle.stop();

    let err = timeout(Duration::from_secs(5), pending)
        .await
        .expect("pending request did not unblock")
        .expect("request task must not panic")
        .expect_err("pending request must observe the stop");
    assert!(matches!(err, Error::AggregatorStopped), "got {err:?}");
    loop_task.await.expect("loop must not panic").expect("loop must stop cleanly");
}
