// tests/flow_scenarios.rs

mod common;
use crate::common::{
    assert_began_after_parents, assert_one_terminal_record_each, init_tracing, with_timeout,
};

use std::collections::BTreeSet;
use std::time::Duration;

use parade::errors::ErrorKind;
use parade::flow::Flow;
use parade::recorder::RunOutcome;
use parade::scheduler::RunOptions;
use parade::task::{TaskDefinition, TaskState};
use parade_test_utils::{
    DispatchLog, EngineBuilder, create_flow, failing_task, noop_task, recording_task,
    sleeping_task,
};

fn position(list: &[String], name: &str) -> usize {
    list.iter()
        .position(|t| t == name)
        .unwrap_or_else(|| panic!("{name} missing from {list:?}"))
}

#[tokio::test]
async fn diamond_runs_every_task_after_its_parents() {
    init_tracing();
    let log = DispatchLog::default();
    let (engine, _clock) = EngineBuilder::new()
        .task(recording_task("A", log.clone()))
        .task(recording_task("B", log.clone()))
        .task(recording_task("C", log.clone()))
        .task(recording_task("D", log.clone()))
        .build();
    let flow = create_flow(&engine, "diamond", &["A", "B", "C", "D"], &["C->A", "C->B", "D->C"]);

    let report = with_timeout(engine.submit(&flow, RunOptions::default().with_concurrency(2)))
        .await
        .expect("run completes");

    let ran = log.snapshot();
    assert_eq!(ran.len(), 4);
    assert!(position(&ran, "A") < position(&ran, "C"));
    assert!(position(&ran, "B") < position(&ran, "C"));
    assert!(position(&ran, "C") < position(&ran, "D"));

    assert!(report.is_success());
    for task in ["A", "B", "C", "D"] {
        assert_eq!(report.state_of(task), Some(TaskState::Succeeded));
        assert_eq!(report.record(task).and_then(|r| r.outcome), Some(ErrorKind::Ok));
    }
    assert_eq!(report.order, vec!["A", "B", "C", "D"]);
    assert_one_terminal_record_each(&engine, &report);
    assert_began_after_parents(&flow, &report);
}

#[tokio::test]
async fn failure_cancels_every_descendant() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new()
        .task(failing_task("A", "boom"))
        .task(noop_task("B"))
        .task(noop_task("C"))
        .build();
    let flow = create_flow(&engine, "fan-out", &["A", "B", "C"], &["B->A", "C->A"]);

    let report = with_timeout(engine.submit(&flow, RunOptions::default()))
        .await
        .expect("run completes");

    assert_eq!(report.outcome, RunOutcome::Failed);
    let a = report.record("A").expect("A recorded");
    assert_eq!(a.state, TaskState::Failed);
    assert_eq!(a.outcome, Some(ErrorKind::BodyError));
    assert!(a.error_message.as_deref().unwrap_or_default().contains("boom"));

    for task in ["B", "C"] {
        let r = report.record(task).expect("recorded");
        assert_eq!(r.state, TaskState::Cancelled);
        assert_eq!(r.outcome, Some(ErrorKind::CancelledByDependency));
        assert_eq!(r.failed_deps(), BTreeSet::from(["A".to_string()]));
        assert!(r.began_at.is_none(), "{task} never started");
    }
    assert!(report.first_error.as_deref().unwrap_or_default().contains("boom"));
    assert_one_terminal_record_each(&engine, &report);
}

#[tokio::test]
async fn cancellation_lists_the_cancelled_parent_for_grandchildren() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new()
        .task(failing_task("A", "boom"))
        .task(noop_task("B"))
        .task(noop_task("C"))
        .build();
    let flow = create_flow(&engine, "chain", &["A", "B", "C"], &["B->A", "C->B"]);

    let report = with_timeout(engine.submit(&flow, RunOptions::default()))
        .await
        .expect("run completes");

    let c = report.record("C").expect("recorded");
    assert_eq!(c.state, TaskState::Cancelled);
    assert_eq!(c.failed_deps(), BTreeSet::from(["B".to_string()]));
}

#[tokio::test]
async fn failure_does_not_touch_unrelated_siblings() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new()
        .task(failing_task("A", "boom"))
        .task(sleeping_task("B", Duration::from_millis(100), false))
        .task(noop_task("C"))
        .build();
    let flow = create_flow(&engine, "siblings", &["A", "B", "C"], &["C->A"]);

    let report = with_timeout(engine.submit(&flow, RunOptions::default().with_concurrency(2)))
        .await
        .expect("run completes");

    assert_eq!(report.state_of("A"), Some(TaskState::Failed));
    assert_eq!(report.state_of("B"), Some(TaskState::Succeeded));
    assert_eq!(report.state_of("C"), Some(TaskState::Cancelled));
    assert_eq!(report.outcome, RunOutcome::Failed);

    // C is cancelled as soon as A fails, while B is still sleeping.
    let b_ended = report.record("B").and_then(|r| r.ended_at).expect("B ended");
    let c_ended = report.record("C").and_then(|r| r.ended_at).expect("C ended");
    assert!(c_ended < b_ended);
}

#[tokio::test]
async fn independent_tasks_dispatch_in_name_order() {
    init_tracing();
    let names: Vec<String> = (1..=10).map(|i| format!("t{i:02}")).collect();

    let mut orders = Vec::new();
    for _ in 0..2 {
        let log = DispatchLog::default();
        let mut builder = EngineBuilder::new();
        for name in &names {
            builder = builder.task(recording_task(name, log.clone()));
        }
        let (engine, _clock) = builder.build();
        let tasks: Vec<&str> = names.iter().map(String::as_str).collect();
        let flow = create_flow(&engine, "wide", &tasks, &[]);

        let report = with_timeout(engine.submit(&flow, RunOptions::default().with_concurrency(3)))
            .await
            .expect("run completes");
        assert!(report.is_success());

        let mut began: Vec<_> = report
            .records
            .values()
            .map(|r| (r.began_at.expect("began"), r.task_name.clone()))
            .collect();
        began.sort();
        orders.push(began.into_iter().map(|(_, t)| t).collect::<Vec<_>>());
    }

    assert_eq!(orders[0], orders[1]);
    assert_eq!(orders[0][..3], names[..3]);
}

#[tokio::test]
async fn concurrency_one_follows_canonical_order() {
    init_tracing();
    let log = DispatchLog::default();
    let (engine, _clock) = EngineBuilder::new()
        .task(recording_task("d", log.clone()))
        .task(recording_task("c", log.clone()))
        .task(recording_task("b", log.clone()))
        .task(recording_task("a", log.clone()))
        .build();
    let flow = create_flow(&engine, "serial", &["d", "c", "b", "a"], &["a->d", "b->c"]);

    let report = with_timeout(engine.submit(&flow, RunOptions::default().with_concurrency(1)))
        .await
        .expect("run completes");

    assert!(report.is_success());
    assert_eq!(report.order, vec!["c", "b", "d", "a"]);
    assert_eq!(log.snapshot(), report.order);
}

#[tokio::test]
async fn empty_flow_succeeds_without_records() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new().build();
    let flow = create_flow(&engine, "empty", &[], &[]);

    let report = with_timeout(engine.submit(&flow, RunOptions::default()))
        .await
        .expect("run completes");

    assert!(report.is_success());
    assert!(report.records.is_empty());
    assert!(report.ended_at.is_some());
}

#[tokio::test]
async fn single_task_runs_once() {
    init_tracing();
    let log = DispatchLog::default();
    let (engine, _clock) = EngineBuilder::new()
        .task(recording_task("only", log.clone()))
        .build();

    let report = with_timeout(engine.run_task("only", RunOptions::default()))
        .await
        .expect("run completes");

    assert!(report.is_success());
    assert_eq!(report.flow_name, "only");
    assert_eq!(log.snapshot(), vec!["only"]);
    assert_one_terminal_record_each(&engine, &report);
}

#[tokio::test]
async fn declared_dependencies_join_the_flow_edges() {
    init_tracing();
    let log = DispatchLog::default();
    let (engine, _clock) = EngineBuilder::new()
        .task(recording_task("extract", log.clone()))
        .task(recording_task("load", log.clone()).depends_on(["extract"]))
        .build();
    let flow = create_flow(&engine, "declared", &["load", "extract"], &[]);

    let report = with_timeout(engine.submit(&flow, RunOptions::default()))
        .await
        .expect("run completes");

    assert_eq!(log.snapshot(), vec!["extract", "load"]);
    assert_began_after_parents(&flow, &report);
}

#[tokio::test]
async fn task_args_and_run_values_reach_bodies() {
    init_tracing();
    let writer = TaskDefinition::generic("writer", |ctx| async move {
        let n = ctx.arg("n").and_then(|v| v.as_i64()).unwrap_or_default();
        ctx.set_value("doubled", serde_json::json!(n * 2))?;
        ctx.set_attribute("rows", serde_json::json!(n))?;
        Ok(())
    });
    let reader = TaskDefinition::generic("reader", |ctx| async move {
        let doubled = ctx.get_value("doubled")?;
        anyhow::ensure!(doubled == Some(serde_json::json!(42)), "unexpected {doubled:?}");
        let writer = ctx.get_task("writer")?;
        anyhow::ensure!(writer.state()? == TaskState::Succeeded, "writer not done");
        Ok(())
    });
    let (engine, _clock) = EngineBuilder::new().task(writer).task(reader).build();
    let flow = create_flow(&engine, "args", &["writer", "reader"], &["reader->writer"]);

    let options = RunOptions::default().with_task_args("writer", serde_json::json!({ "n": 21 }));
    let report = with_timeout(engine.submit(&flow, options))
        .await
        .expect("run completes");

    assert!(report.is_success(), "{:?}", report.first_error);
    let writer = report.record("writer").expect("recorded");
    assert_eq!(writer.attributes.get("rows"), Some(&serde_json::json!(21)));
}

#[tokio::test]
async fn body_panic_is_a_body_error() {
    init_tracing();
    let panicky = TaskDefinition::generic("panicky", |_ctx| async move {
        if true {
            panic!("kaboom");
        }
        Ok(())
    });
    let (engine, _clock) = EngineBuilder::new().task(panicky).build();

    let report = with_timeout(engine.run_task("panicky", RunOptions::default()))
        .await
        .expect("run completes");

    let r = report.record("panicky").expect("recorded");
    assert_eq!(r.state, TaskState::Failed);
    assert_eq!(r.outcome, Some(ErrorKind::BodyError));
}

#[tokio::test]
async fn failed_record_keeps_no_body_attributes() {
    init_tracing();
    let half = TaskDefinition::generic("half", |ctx| async move {
        ctx.set_attribute("rows", serde_json::json!(10))?;
        anyhow::bail!("half way")
    });
    let (engine, _clock) = EngineBuilder::new().task(half).build();

    let report = with_timeout(engine.run_task("half", RunOptions::default()))
        .await
        .expect("run completes");

    let r = report.record("half").expect("recorded");
    assert_eq!(r.state, TaskState::Failed);
    assert!(!r.attributes.contains_key("rows"));
    assert!(r.current_checkpoint().is_some());
}

#[tokio::test]
async fn flow_built_in_code_matches_stored_flow() {
    init_tracing();
    let (engine, _clock) = EngineBuilder::new()
        .task(noop_task("x"))
        .task(noop_task("y"))
        .build();
    let stored = create_flow(&engine, "xy", &["x", "y"], &["y->x"]);
    let in_code = Flow::new(
        "xy",
        vec!["x".into(), "y".into()],
        parade::flow::parse_edges(["y->x"]).expect("edges"),
        engine.tasks(),
    )
    .expect("valid flow");

    assert_eq!(stored.topological_order(), in_code.topological_order());
    assert_eq!(stored.deps(), in_code.deps());
}
