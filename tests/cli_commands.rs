// tests/cli_commands.rs

#![cfg(unix)]

mod common;
use crate::common::{init_tracing, with_timeout};

use std::fs;
use std::path::Path;

use clap::Parser;
use parade::cli::{CliArgs, Command, FlowCommand};
use parade::errors::ParadeError;
use parade::recorder::RunOutcome;
use parade::store::{SqliteStore, StateStore};
use parade::task::TaskState;

const CONFIG: &str = r#"
[config]
concurrency = 2

[task.extract]
cmd = "echo extracting"

[task.load]
cmd = "echo loading"

[task.broken]
cmd = "exit 1"
"#;

fn args(dir: &Path, rest: &[&str]) -> CliArgs {
    let config = dir.join("Parade.toml");
    let state = dir.join("state.db");
    let mut argv = vec![
        "parade".to_string(),
        "--config".to_string(),
        config.display().to_string(),
        "--state".to_string(),
        state.display().to_string(),
    ];
    argv.extend(rest.iter().map(|s| s.to_string()));
    CliArgs::try_parse_from(argv).expect("valid command line")
}

#[test]
fn command_line_parses_into_subcommands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let parsed = args(
        dir.path(),
        &["flow", "create", "nightly", "extract", "load", "--dep", "load->extract"],
    );
    match parsed.command {
        Command::Flow(FlowCommand::Create { name, tasks, deps }) => {
            assert_eq!(name, "nightly");
            assert_eq!(tasks, vec!["extract", "load"]);
            assert_eq!(deps, vec!["load->extract"]);
        }
        other => panic!("unexpected command {other:?}"),
    }

    let parsed = args(dir.path(), &["flow", "run", "nightly", "--force", "--concurrency", "4"]);
    assert!(matches!(
        parsed.command,
        Command::Flow(FlowCommand::Run { force: true, concurrency: Some(4), .. })
    ));

    let argv = ["parade", "flow", "run", "nightly", "--concurrency", "0"];
    assert!(CliArgs::try_parse_from(argv).is_err());
    assert!(CliArgs::try_parse_from(["parade", "flow", "create", "empty"]).is_err());
}

#[tokio::test]
async fn create_run_and_remove_a_flow() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("Parade.toml"), CONFIG).expect("config written");

    let created = parade::run(args(
        dir.path(),
        &["flow", "create", "nightly", "extract", "load", "--dep", "load->extract"],
    ))
    .await
    .expect("flow created");
    assert!(created);

    assert!(parade::run(args(dir.path(), &["flow", "list"])).await.expect("listed"));

    let ran = with_timeout(parade::run(args(dir.path(), &["flow", "run", "nightly"])))
        .await
        .expect("flow ran");
    assert!(ran);

    let store = SqliteStore::open(&dir.path().join("state.db")).expect("state db");
    assert_eq!(store.list_flows().expect("flows"), vec!["nightly"]);
    let loads = store.records_for_task("load").expect("records");
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].state, TaskState::Succeeded);
    let run = store.get_run(loads[0].run_id).expect("readable").expect("present");
    assert_eq!(run.outcome, Some(RunOutcome::Succeeded));

    assert!(parade::run(args(dir.path(), &["flow", "remove", "nightly"])).await.expect("removed"));
    assert!(parade::run(args(dir.path(), &["flow", "remove", "nightly"])).await.expect("no-op"));

    let err = parade::run(args(dir.path(), &["flow", "run", "nightly"]))
        .await
        .expect_err("flow is gone");
    assert!(matches!(
        err.downcast_ref::<ParadeError>(),
        Some(ParadeError::UnknownFlow(_))
    ));
}

#[tokio::test]
async fn failing_task_run_reports_false() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("Parade.toml"), CONFIG).expect("config written");

    let ok = with_timeout(parade::run(args(dir.path(), &["task", "run", "broken"])))
        .await
        .expect("run completes");
    assert!(!ok);

    assert!(parade::run(args(dir.path(), &["task", "list"])).await.expect("listed"));

    let err = parade::run(args(dir.path(), &["task", "run", "ghost"]))
        .await
        .expect_err("unknown task");
    assert!(matches!(
        err.downcast_ref::<ParadeError>(),
        Some(ParadeError::UnknownTask(_))
    ));
}

#[tokio::test]
async fn creating_a_cyclic_flow_fails() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("Parade.toml"), CONFIG).expect("config written");

    let err = parade::run(args(
        dir.path(),
        &[
            "flow", "create", "loop", "extract", "load", "--dep", "load->extract", "--dep",
            "extract->load",
        ],
    ))
    .await
    .expect_err("cycle");
    assert!(matches!(
        err.downcast_ref::<ParadeError>(),
        Some(ParadeError::CyclicFlow(_))
    ));
}
