// tests/checkpoint_skip.rs

mod common;
use crate::common::{init_tracing, ts, with_timeout};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parade::errors::ErrorKind;
use parade::recorder::{
    CURRENT_CHECKPOINT, Checkpoint, LAST_CHECKPOINT, SKIPPED, TaskRecord, align,
};
use parade::recorder::checkpoint::{NEVER, format_checkpoint, parse_checkpoint};
use parade::scheduler::RunOptions;
use parade::store::{SqliteStore, StateStore};
use parade::task::{TaskDefinition, TaskState};
use parade_test_utils::{EngineBuilder, create_flow, failing_task, noop_task};
use serde_json::json;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn counting_task(name: &str, counter: Arc<AtomicUsize>) -> TaskDefinition {
    TaskDefinition::generic(name, move |_ctx| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .granularity(DAY)
}

#[test]
fn align_rounds_down_to_the_grid() {
    let now = ts("2024-03-05T17:42:13.123456Z");
    assert_eq!(align(now, DAY), ts("2024-03-05T00:00:00Z"));
    assert_eq!(align(now, Duration::from_secs(3600)), ts("2024-03-05T17:00:00Z"));
    assert_eq!(align(now, Duration::from_secs(15 * 60)), ts("2024-03-05T17:30:00Z"));
}

#[test]
fn align_is_idempotent_on_grid_points() {
    let midnight = ts("2024-03-05T00:00:00Z");
    assert_eq!(align(midnight, DAY), midnight);
}

#[test]
fn align_before_the_epoch_still_rounds_down() {
    let before = ts("1969-12-31T23:00:00Z");
    assert_eq!(align(before, DAY), ts("1969-12-31T00:00:00Z"));
}

#[test]
fn zero_granularity_keeps_microsecond_precision() {
    let now = ts("2024-03-05T17:42:13.123456Z");
    assert_eq!(align(now, Duration::ZERO), now);
}

#[test]
fn checkpoint_strings_round_trip() {
    let t = ts("2024-03-05T00:00:00Z");
    let s = format_checkpoint(t);
    assert_eq!(s, "2024-03-05T00:00:00.000000Z");
    assert_eq!(parse_checkpoint(&json!(s)), Some(t));
    assert_eq!(parse_checkpoint(&json!(NEVER)), None);
    assert_eq!(parse_checkpoint(&json!(12)), None);
}

#[test]
fn never_succeeded_is_never_fresh() {
    let cp = Checkpoint::compute(None, ts("2024-03-05T10:00:00Z"), DAY);
    assert!(!cp.is_fresh());
    let attrs = cp.to_attributes();
    assert_eq!(attrs.get(LAST_CHECKPOINT), Some(&json!(NEVER)));
    assert_eq!(
        attrs.get(CURRENT_CHECKPOINT),
        Some(&json!("2024-03-05T00:00:00.000000Z"))
    );
}

#[test]
fn success_in_the_same_window_is_fresh() {
    let mut last = TaskRecord {
        attempt_id: 1,
        run_id: 1,
        task_name: "t".into(),
        flow_id: "f".into(),
        flow_name: "t".into(),
        state: TaskState::Succeeded,
        began_at: None,
        ended_at: None,
        outcome: Some(ErrorKind::Ok),
        attributes: Default::default(),
        error_message: None,
    };
    last.attributes
        .insert(CURRENT_CHECKPOINT.into(), json!("2024-03-05T00:00:00.000000Z"));

    let same_day = Checkpoint::compute(Some(&last), ts("2024-03-05T23:59:59Z"), DAY);
    assert!(same_day.is_fresh());

    let next_day = Checkpoint::compute(Some(&last), ts("2024-03-06T00:00:00Z"), DAY);
    assert!(!next_day.is_fresh());
    assert_eq!(next_day.last, Some(ts("2024-03-05T00:00:00Z")));
}

#[tokio::test]
async fn second_run_in_the_same_window_skips_the_body() {
    init_tracing();
    let counter = Arc::new(AtomicUsize::new(0));
    let (engine, clock) = EngineBuilder::new()
        .task(counting_task("T", Arc::clone(&counter)))
        .build();

    let first = with_timeout(engine.run_task("T", RunOptions::default()))
        .await
        .expect("first run");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(first.state_of("T"), Some(TaskState::Succeeded));
    let r1 = first.record("T").expect("recorded");
    assert_eq!(r1.outcome, Some(ErrorKind::Ok));
    assert_eq!(r1.attributes.get(LAST_CHECKPOINT), Some(&json!(NEVER)));

    clock.advance(chrono::Duration::hours(1));
    let second = with_timeout(engine.run_task("T", RunOptions::default()))
        .await
        .expect("second run");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let r2 = second.record("T").expect("recorded");
    assert_eq!(r2.state, TaskState::Succeeded);
    assert_eq!(r2.outcome, Some(ErrorKind::Skipped));
    assert!(r2.was_skipped());
    assert_eq!(r2.attributes.get(SKIPPED), Some(&json!(true)));
    assert!(second.is_success());

    clock.advance(chrono::Duration::hours(24));
    let third = with_timeout(engine.run_task("T", RunOptions::default()))
        .await
        .expect("third run");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    let r3 = third.record("T").expect("recorded");
    assert_eq!(r3.outcome, Some(ErrorKind::Ok));
    assert_eq!(r3.last_checkpoint(), r1.current_checkpoint());
}

#[tokio::test]
async fn force_runs_the_body_even_when_fresh() {
    init_tracing();
    let counter = Arc::new(AtomicUsize::new(0));
    let (engine, _clock) = EngineBuilder::new()
        .task(counting_task("T", Arc::clone(&counter)))
        .build();

    with_timeout(engine.run_task("T", RunOptions::default()))
        .await
        .expect("first run");
    let forced = with_timeout(engine.run_task("T", RunOptions::default().with_force(true)))
        .await
        .expect("forced run");

    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(forced.record("T").and_then(|r| r.outcome), Some(ErrorKind::Ok));
}

#[tokio::test]
async fn failures_do_not_count_as_last_success() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new()
        .task(failing_task("F", "nope"))
        .build();

    with_timeout(engine.run_task("F", RunOptions::default()))
        .await
        .expect("run completes");
    with_timeout(engine.run_task("F", RunOptions::default()))
        .await
        .expect("run completes");

    assert!(engine.recorder().last_success("F").expect("readable").is_none());
    let all = engine.store().records_for_task("F").expect("readable");
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|r| r.state == TaskState::Failed));
}

#[tokio::test]
async fn pending_record_carries_the_checkpoint_pair() {
    init_tracing();
    let counter = Arc::new(AtomicUsize::new(0));
    let (engine, clock) = EngineBuilder::new()
        .task(counting_task("T", counter))
        .build();
    clock.set(ts("2024-06-01T12:00:00Z"));

    let report = with_timeout(engine.run_task("T", RunOptions::default()))
        .await
        .expect("run completes");

    let r = report.record("T").expect("recorded");
    assert_eq!(r.current_checkpoint(), Some(ts("2024-06-01T00:00:00Z")));
    assert_eq!(r.last_checkpoint(), None);
    assert_eq!(r.attributes.get(LAST_CHECKPOINT), Some(&json!(NEVER)));
}

#[tokio::test]
async fn rerun_after_a_failure_completes_the_flow_and_skips_earlier_successes() {
    init_tracing();
    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::in_memory().expect("in-memory sqlite"));

    let (broken, _clock) = EngineBuilder::new()
        .task(failing_task("A", "upstream down"))
        .task(noop_task("B"))
        .task(noop_task("C"))
        .store(Arc::clone(&store))
        .build();
    create_flow(&broken, "nightly", &["A", "B", "C"], &["B->A"]);

    let first = with_timeout(broken.run_flow("nightly", RunOptions::default()))
        .await
        .expect("first run");
    assert_eq!(first.state_of("A"), Some(TaskState::Failed));
    assert_eq!(first.state_of("B"), Some(TaskState::Cancelled));
    assert_eq!(first.state_of("C"), Some(TaskState::Succeeded));
    assert!(!first.is_success());

    // Same database, A fixed.
    let (fixed, _clock) = EngineBuilder::new()
        .task(noop_task("A"))
        .task(noop_task("B"))
        .task(noop_task("C"))
        .store(Arc::clone(&store))
        .build();

    let second = with_timeout(fixed.run_flow("nightly", RunOptions::default()))
        .await
        .expect("second run");
    assert!(second.is_success());
    for task in ["A", "B"] {
        let r = second.record(task).expect("recorded");
        assert_eq!(r.state, TaskState::Succeeded, "{task}");
        assert_eq!(r.outcome, Some(ErrorKind::Ok), "{task}");
    }
    let c = second.record("C").expect("recorded");
    assert_eq!(c.state, TaskState::Succeeded);
    assert_eq!(c.outcome, Some(ErrorKind::Skipped));

    assert_eq!(store.records_for_task("B").expect("readable").len(), 2);
}

#[tokio::test]
async fn back_to_back_flow_runs_skip_every_task() {
    init_tracing();
    let counter = Arc::new(AtomicUsize::new(0));
    let (engine, clock) = EngineBuilder::new()
        .task(counting_task("extract", Arc::clone(&counter)))
        .task(counting_task("transform", Arc::clone(&counter)))
        .task(counting_task("load", Arc::clone(&counter)))
        .build();
    create_flow(
        &engine,
        "etl",
        &["extract", "transform", "load"],
        &["transform->extract", "load->transform"],
    );

    let first = with_timeout(engine.run_flow("etl", RunOptions::default()))
        .await
        .expect("first run");
    assert!(first.is_success());
    assert_eq!(counter.load(Ordering::SeqCst), 3);

    clock.advance(chrono::Duration::minutes(5));
    let second = with_timeout(engine.run_flow("etl", RunOptions::default()))
        .await
        .expect("second run");
    assert!(second.is_success());
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    for task in ["extract", "transform", "load"] {
        let r = second.record(task).expect("recorded");
        assert_eq!(r.state, TaskState::Succeeded, "{task}");
        assert_eq!(r.outcome, Some(ErrorKind::Skipped), "{task}");
        assert!(r.was_skipped(), "{task}");
    }
}
