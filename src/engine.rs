// src/engine.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the task and connection registries
//! - the state store, through the flow store and the recorder
//! - one [`FlowRunner`] per submitted run, fed by a Tokio executor (or
//!   any other [`ExecutorBackend`])
//!
//! `submit` only returns once every task of the run is terminal.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::connection::ConnectionRegistry;
use crate::context::{ExecutionContext, FlowObserver};
use crate::errors::{ParadeError, Result};
use crate::exec::{ExecutorBackend, TokioExecutor};
use crate::flow::{Flow, FlowStore};
use crate::recorder::{Clock, Recorder, RunId, RunOutcome, SystemClock, TaskRecord};
use crate::scheduler::{FlowRunner, RunOptions, WorkerReport};
use crate::store::{SqliteStore, StateStore};
use crate::task::{TaskRegistry, TaskState};

/// Result of one submitted run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub flow_name: String,
    pub flow_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    /// Task names in canonical (topological) order.
    pub order: Vec<String>,
    /// Final record of every task, by task name.
    pub records: BTreeMap<String, TaskRecord>,
    /// Error message of the first failed task in topological order, or the
    /// scheduler-fatal error if the run was aborted.
    pub first_error: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    pub fn record(&self, task: &str) -> Option<&TaskRecord> {
        self.records.get(task)
    }

    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.records.get(task).map(|r| r.state)
    }
}

pub struct Engine {
    tasks: Arc<TaskRegistry>,
    connections: Arc<ConnectionRegistry>,
    store: Arc<dyn StateStore>,
    recorder: Arc<Recorder>,
    observers: Vec<Arc<dyn FlowObserver>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tasks", &self.tasks.len())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        tasks: TaskRegistry,
        connections: ConnectionRegistry,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let recorder = Arc::new(Recorder::new(Arc::clone(&store), clock));
        Self {
            tasks: Arc::new(tasks),
            connections: Arc::new(connections),
            store,
            recorder,
            observers: Vec::new(),
        }
    }

    /// Engine over an in-memory state database and the system clock.
    pub fn in_memory(tasks: TaskRegistry, connections: ConnectionRegistry) -> Result<Self> {
        let store: Arc<dyn StateStore> = Arc::new(SqliteStore::in_memory()?);
        Ok(Self::new(tasks, connections, store, Arc::new(SystemClock)))
    }

    /// Subscribe an observer to every subsequent run.
    pub fn observe(&mut self, observer: Arc<dyn FlowObserver>) {
        self.observers.push(observer);
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn flows(&self) -> FlowStore {
        FlowStore::new(Arc::clone(&self.store), Arc::clone(&self.tasks))
    }

    /// Run a flow with the Tokio executor.
    pub async fn submit(&self, flow: &Flow, options: RunOptions) -> Result<RunReport> {
        self.submit_with(flow, options, TokioExecutor::new).await
    }

    /// Run a flow with a caller-supplied executor backend, built from the
    /// sending half of the run's result channel.
    pub async fn submit_with<E, F>(
        &self,
        flow: &Flow,
        options: RunOptions,
        make_executor: F,
    ) -> Result<RunReport>
    where
        E: ExecutorBackend,
        F: FnOnce(mpsc::Sender<WorkerReport>) -> E,
    {
        let flow = Arc::new(flow.clone());
        let flow_id = Uuid::new_v4().to_string();
        let run_id = self.recorder.begin_run(flow.name())?;

        let ctx = Arc::new(ExecutionContext::new(
            flow_id.clone(),
            run_id,
            Arc::clone(&flow),
            Arc::clone(&self.recorder),
            Arc::clone(&self.connections),
            Arc::clone(&self.tasks),
            self.observers.clone(),
            &options.task_args,
        )?);

        let (tx, rx) = mpsc::channel(options.concurrency.max(16));
        let executor = make_executor(tx);
        let summary = FlowRunner::new(ctx, options, executor, rx).run().await;

        let run = self.recorder.run(run_id)?.ok_or_else(|| {
            ParadeError::Other(anyhow::anyhow!("run {run_id} missing from state store"))
        })?;
        let records: BTreeMap<String, TaskRecord> = self
            .recorder
            .records_for_run(run_id)?
            .into_iter()
            .map(|r| (r.task_name.clone(), r))
            .collect();

        let first_error = flow
            .topological_order()
            .iter()
            .filter_map(|t| records.get(t))
            .find(|r| r.state == TaskState::Failed)
            .and_then(|r| r.error_message.clone())
            .or(summary.fatal);

        info!(
            flow = %flow.name(),
            run_id,
            outcome = summary.outcome.as_str(),
            "run complete"
        );

        Ok(RunReport {
            run_id,
            flow_name: flow.name().to_string(),
            flow_id,
            started_at: run.started_at,
            ended_at: run.ended_at,
            outcome: summary.outcome,
            order: flow.topological_order().to_vec(),
            records,
            first_error,
        })
    }

    /// Load a stored flow and run it.
    pub async fn run_flow(&self, name: &str, options: RunOptions) -> Result<RunReport> {
        let flow = self.flows().load(name)?;
        self.submit(&flow, options).await
    }

    /// Run a single registered task as a one-task flow.
    pub async fn run_task(&self, name: &str, options: RunOptions) -> Result<RunReport> {
        let task = self.tasks.get(name)?;
        self.submit(&Flow::singleton(task), options).await
    }
}
