// src/lib.rs

pub mod cli;
pub mod config;
pub mod connection;
pub mod context;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod flow;
pub mod logging;
pub mod recorder;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, FlowCommand, TaskCommand};
use crate::config::{default_config_path, load_or_default};
use crate::engine::{Engine, RunReport};
use crate::flow::parse_edges;
use crate::recorder::SystemClock;
use crate::store::{SqliteStore, StateStore};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the task/connection registries it declares
/// - the SQLite state store
/// - the engine, for the requested subcommand
///
/// Returns `Ok(false)` when a run finished but did not fully succeed.
pub async fn run(args: CliArgs) -> Result<bool> {
    let (config_path, explicit) = match &args.config {
        Some(path) => (path.clone(), true),
        None => (default_config_path(), false),
    };
    let cfg = load_or_default(&config_path, explicit)?;
    debug!(
        path = %config_path.display(),
        tasks = cfg.task.len(),
        connections = cfg.connection.len(),
        "configuration loaded"
    );

    let state_path: PathBuf = args.state.clone().unwrap_or_else(|| cfg.config.state.clone());
    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open(&state_path)?);
    let (tasks, connections) = cfg.build_registries()?;
    let engine = Engine::new(tasks, connections, store, Arc::new(SystemClock));

    match args.command {
        Command::Flow(FlowCommand::Create { name, tasks, deps }) => {
            let deps = parse_edges(deps.iter().map(String::as_str))?;
            let flow = engine.flows().create(&name, tasks, deps)?;
            info!(flow = %flow.name(), order = ?flow.topological_order(), "flow stored");
            Ok(true)
        }
        Command::Flow(FlowCommand::List) => {
            for name in engine.flows().list()? {
                println!("{name}");
            }
            Ok(true)
        }
        Command::Flow(FlowCommand::Run {
            name,
            force,
            concurrency,
        }) => {
            let mut options = cfg.run_options()?.with_force(force);
            if let Some(n) = concurrency {
                options = options.with_concurrency(n);
            }
            let report = engine.run_flow(&name, options).await?;
            Ok(print_report(&report))
        }
        Command::Flow(FlowCommand::Remove { name }) => {
            if !engine.flows().remove(&name)? {
                debug!(flow = %name, "flow did not exist");
            }
            Ok(true)
        }
        Command::Task(TaskCommand::List) => {
            for name in engine.tasks().names() {
                println!("{name}");
            }
            Ok(true)
        }
        Command::Task(TaskCommand::Run { name, force }) => {
            let options = cfg.run_options()?.with_force(force);
            let report = engine.run_task(&name, options).await?;
            Ok(print_report(&report))
        }
    }
}

/// Print one `task: state` line per task, then the first error if any.
fn print_report(report: &RunReport) -> bool {
    for task in &report.order {
        match report.record(task) {
            Some(record) if record.was_skipped() => println!("{task}: {} (skipped)", record.state),
            Some(record) => println!("{task}: {}", record.state),
            None => println!("{task}: unknown"),
        }
    }

    if !report.is_success() {
        let message = report
            .first_error
            .as_deref()
            .unwrap_or("one or more tasks did not succeed");
        eprintln!("flow '{}' failed: {message}", report.flow_name);
    }
    report.is_success()
}
