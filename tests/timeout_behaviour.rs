// tests/timeout_behaviour.rs

mod common;
use crate::common::{init_tracing, with_timeout};

use std::time::Duration;

use parade::errors::ErrorKind;
use parade::recorder::TIMEOUT_GRACE;
use parade::scheduler::RunOptions;
use parade::task::TaskState;
use parade_test_utils::{EngineBuilder, create_flow, noop_task, sleeping_task};
use serde_json::json;

#[tokio::test]
async fn cooperative_body_honours_the_timeout() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new()
        .task(sleeping_task("slow", Duration::from_secs(30), true).timeout(Duration::from_millis(50)))
        .task(noop_task("after"))
        .build();
    let flow = create_flow(&engine, "timed", &["slow", "after"], &["after->slow"]);

    let report = with_timeout(engine.submit(&flow, RunOptions::default()))
        .await
        .expect("run completes");

    let slow = report.record("slow").expect("recorded");
    assert_eq!(slow.state, TaskState::Failed);
    assert_eq!(slow.outcome, Some(ErrorKind::Timeout));
    assert_eq!(slow.attributes.get(TIMEOUT_GRACE), Some(&json!("honoured")));
    assert_eq!(report.state_of("after"), Some(TaskState::Cancelled));
}

#[tokio::test]
async fn stubborn_body_is_abandoned_after_the_grace_window() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new()
        .task(sleeping_task("stubborn", Duration::from_secs(30), false).timeout(Duration::from_millis(50)))
        .build();

    let started = std::time::Instant::now();
    let report = with_timeout(engine.run_task(
        "stubborn",
        RunOptions::default().with_grace(Duration::from_millis(100)),
    ))
    .await
    .expect("run completes");

    let r = report.record("stubborn").expect("recorded");
    assert_eq!(r.outcome, Some(ErrorKind::Timeout));
    assert_eq!(r.attributes.get(TIMEOUT_GRACE), Some(&json!("abandoned")));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn body_within_its_timeout_succeeds() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new()
        .task(sleeping_task("quick", Duration::from_millis(10), true).timeout(Duration::from_secs(5)))
        .build();

    let report = with_timeout(engine.run_task("quick", RunOptions::default()))
        .await
        .expect("run completes");

    let r = report.record("quick").expect("recorded");
    assert_eq!(r.state, TaskState::Succeeded);
    assert!(!r.attributes.contains_key(TIMEOUT_GRACE));
}

#[cfg(unix)]
#[tokio::test]
async fn shell_task_is_killed_on_timeout() {
    init_tracing();
    let task = parade::task::command::shell_task("sleepy", "sleep 30").timeout(Duration::from_millis(100));
    let (engine, _clock) = EngineBuilder::new().task(task).build();

    let report = with_timeout(engine.run_task("sleepy", RunOptions::default()))
        .await
        .expect("run completes");

    let r = report.record("sleepy").expect("recorded");
    assert_eq!(r.outcome, Some(ErrorKind::Timeout));
    assert_eq!(r.attributes.get(TIMEOUT_GRACE), Some(&json!("honoured")));
}

#[cfg(unix)]
#[tokio::test]
async fn shell_task_exit_code_decides_the_outcome() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new()
        .task(parade::task::command::shell_task("ok", "true"))
        .task(parade::task::command::shell_task("bad", "exit 3"))
        .build();
    let flow = create_flow(&engine, "shell", &["ok", "bad"], &[]);

    let report = with_timeout(engine.submit(&flow, RunOptions::default()))
        .await
        .expect("run completes");

    assert_eq!(report.state_of("ok"), Some(TaskState::Succeeded));
    let bad = report.record("bad").expect("recorded");
    assert_eq!(bad.outcome, Some(ErrorKind::BodyError));
    assert!(bad.error_message.as_deref().unwrap_or_default().contains("code 3"));
}
