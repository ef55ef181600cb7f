// tests/sqlite_store.rs

mod common;
use crate::common::{init_tracing, ts, with_timeout};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parade::errors::ErrorKind;
use parade::recorder::{Attributes, Recorder, RunOutcome, TaskRecord};
use parade::scheduler::RunOptions;
use parade::store::{SqliteStore, StateStore, StoredFlow};
use parade::task::TaskState;
use parade_test_utils::{DispatchLog, EngineBuilder, create_flow, recording_task};
use serde_json::json;

fn pending(task: &str, run_id: i64) -> TaskRecord {
    TaskRecord {
        attempt_id: 0,
        run_id,
        task_name: task.to_string(),
        flow_id: "flow-1".to_string(),
        flow_name: "f".to_string(),
        state: TaskState::Pending,
        began_at: None,
        ended_at: None,
        outcome: None,
        attributes: Attributes::from([("k".to_string(), json!({"nested": [1, 2]}))]),
        error_message: None,
    }
}

#[test]
fn records_survive_a_round_trip() {
    let store = SqliteStore::in_memory().expect("sqlite");
    let run_id = store.insert_run("f", ts("2024-01-01T00:00:00Z")).expect("run");

    let id = store.insert_record(&pending("a", run_id)).expect("inserted");
    let mut record = store.get_record(id).expect("readable").expect("present");
    assert_eq!(record.attempt_id, id);
    assert_eq!(record.state, TaskState::Pending);
    assert_eq!(record.attributes.get("k"), Some(&json!({"nested": [1, 2]})));

    record.state = TaskState::Failed;
    record.began_at = Some(ts("2024-01-01T00:00:01.000001Z"));
    record.ended_at = Some(ts("2024-01-01T00:00:02.5Z"));
    record.outcome = Some(ErrorKind::Timeout);
    record.error_message = Some("too slow".to_string());
    assert!(store.update_record(&record).expect("updated"));

    let back = store.get_record(id).expect("readable").expect("present");
    assert_eq!(back, record);
}

#[test]
fn terminal_records_are_never_rewritten() {
    let store = SqliteStore::in_memory().expect("sqlite");
    let run_id = store.insert_run("f", ts("2024-01-01T00:00:00Z")).expect("run");
    let id = store.insert_record(&pending("a", run_id)).expect("inserted");

    let mut record = store.get_record(id).expect("readable").expect("present");
    record.state = TaskState::Succeeded;
    record.outcome = Some(ErrorKind::Ok);
    record.ended_at = Some(ts("2024-01-01T00:00:03Z"));
    assert!(store.update_record(&record).expect("first terminal write"));

    record.state = TaskState::Failed;
    assert!(!store.update_record(&record).expect("second write refused"));
    let back = store.get_record(id).expect("readable").expect("present");
    assert_eq!(back.state, TaskState::Succeeded);
}

#[test]
fn last_success_is_the_latest_succeeded_record() {
    let store = Arc::new(SqliteStore::in_memory().expect("sqlite"));
    let run_id = store.insert_run("f", ts("2024-01-01T00:00:00Z")).expect("run");

    let finish = |state: TaskState, ended: &str| {
        let id = store.insert_record(&pending("a", run_id)).expect("inserted");
        let mut r = store.get_record(id).expect("readable").expect("present");
        r.state = state;
        r.ended_at = Some(ts(ended));
        store.update_record(&r).expect("updated");
        id
    };
    finish(TaskState::Succeeded, "2024-01-01T01:00:00Z");
    let latest = finish(TaskState::Succeeded, "2024-01-02T01:00:00Z");
    finish(TaskState::Failed, "2024-01-03T01:00:00Z");

    let last = store.last_success("a").expect("readable").expect("present");
    assert_eq!(last.attempt_id, latest);
    assert!(store.last_success("b").expect("readable").is_none());
    assert_eq!(store.records_for_task("a").expect("readable").len(), 3);
}

#[test]
fn runs_and_flows_round_trip() {
    let store = SqliteStore::in_memory().expect("sqlite");
    let run_id = store.insert_run("f", ts("2024-01-01T00:00:00Z")).expect("run");
    store
        .finish_run(run_id, ts("2024-01-01T00:05:00Z"), RunOutcome::Failed)
        .expect("finished");
    let run = store.get_run(run_id).expect("readable").expect("present");
    assert_eq!(run.flow_name, "f");
    assert_eq!(run.outcome, Some(RunOutcome::Failed));
    assert_eq!(run.ended_at, Some(ts("2024-01-01T00:05:00Z")));

    let flow = StoredFlow {
        name: "f".to_string(),
        tasks: vec!["b".to_string(), "a".to_string()],
        deps: BTreeMap::from([("b".to_string(), BTreeSet::from(["a".to_string()]))]),
        created_at: ts("2024-01-01T00:00:00Z"),
    };
    store.save_flow(&flow).expect("saved");
    assert_eq!(store.load_flow("f").expect("readable"), Some(flow));
    assert!(store.delete_flow("f").expect("deleted"));
    assert_eq!(store.load_flow("f").expect("readable"), None);
}

#[test]
fn recorder_stamps_are_strictly_increasing_under_a_frozen_clock() {
    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::in_memory().expect("sqlite"));
    let clock = Arc::new(parade::recorder::ManualClock::new(ts("2024-01-01T00:00:00Z")));
    let recorder = Recorder::new(store, clock);

    let run_id = recorder.begin_run("f").expect("run");
    let a = recorder
        .on_pending("a", "flow-1", "f", run_id, Attributes::new())
        .expect("pending");
    recorder.on_start(a).expect("start");
    recorder.on_success(a, Attributes::new()).expect("success");

    let record = recorder.store().get_record(a).expect("readable").expect("present");
    let began = record.began_at.expect("began");
    let ended = record.ended_at.expect("ended");
    assert!(began > ts("2024-01-01T00:00:00Z"));
    assert!(ended > began);
    assert_eq!(record.outcome, Some(ErrorKind::Ok));

    assert!(recorder.on_failure(a, ErrorKind::BodyError, "late", Attributes::new()).is_err());
}

#[tokio::test]
async fn replaying_a_flow_against_a_file_store_adds_a_new_attempt() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state").join("parade.db");

    let mut attempts = Vec::new();
    for _ in 0..2 {
        let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open(&path).expect("opened"));
        let log = DispatchLog::default();
        let (engine, _clock) = EngineBuilder::new()
            .task(recording_task("a", log.clone()))
            .task(recording_task("b", log.clone()))
            .store(store)
            .build();
        let flow = create_flow(&engine, "replay", &["a", "b"], &["b->a"]);

        let report = with_timeout(engine.submit(&flow, RunOptions::default().with_force(true)))
            .await
            .expect("run completes");
        assert!(report.is_success());
        assert_eq!(log.snapshot(), vec!["a", "b"]);
        attempts.push(report.record("a").expect("recorded").attempt_id);
    }

    assert_ne!(attempts[0], attempts[1]);
    let store = SqliteStore::open(&path).expect("reopened");
    let history = store.records_for_task("a").expect("readable");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.state == TaskState::Succeeded));
}
