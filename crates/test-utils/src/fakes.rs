use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use parade::connection::{Connection, Dataset, MemoryConnection, TypeHints};
use parade::context::{FlowEvent, FlowObserver, TaskEvent};
use parade::errors::{ParadeError, Result};
use parade::recorder::{AttemptId, RunId, RunOutcome, RunRecord, TaskRecord};
use parade::store::{SqliteStore, StateStore, StoredFlow};
use parade::task::TaskState;
use parade::types::WriteMode;

/// Observer that keeps every event it receives.
///
/// With `panicking()`, it panics on every task event after recording it.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    tasks: Mutex<Vec<TaskEvent>>,
    flows: Mutex<Vec<FlowEvent>>,
    panic_on_task: bool,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_task: true,
            ..Self::default()
        }
    }

    pub fn task_events(&self) -> Vec<TaskEvent> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn flow_events(&self) -> Vec<FlowEvent> {
        self.flows.lock().unwrap().clone()
    }
}

impl FlowObserver for RecordingObserver {
    fn on_task_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
        self.tasks.lock().unwrap().push(event.clone());
        if self.panic_on_task {
            panic!("observer blew up on {}", event.task);
        }
        Ok(())
    }

    fn on_flow_event(&self, event: &FlowEvent) -> anyhow::Result<()> {
        self.flows.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Connection that reads like an in-memory store but rejects every write.
#[derive(Debug)]
pub struct RejectingConnection {
    inner: MemoryConnection,
}

impl RejectingConnection {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryConnection::new(name),
        }
    }
}

impl Connection for RejectingConnection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn load(&self, table: &str) -> Result<Dataset> {
        self.inner.load(table)
    }

    fn load_query(&self, query: &str) -> Result<Dataset> {
        self.inner.load_query(query)
    }

    fn store(
        &self,
        _dataset: &Dataset,
        table: &str,
        _mode: WriteMode,
        _hints: &TypeHints,
    ) -> Result<()> {
        Err(ParadeError::Other(anyhow::anyhow!(
            "write to '{table}' rejected"
        )))
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        self.inner.table_exists(table)
    }
}

/// State store that refuses to record one task reaching one state.
///
/// Every other call goes to an in-memory SQLite store, so the rest of the
/// run (including the abort path) is still recorded.
pub struct UnreliableStore {
    inner: Arc<dyn StateStore>,
    task: String,
    state: TaskState,
}

impl UnreliableStore {
    pub fn failing_on(task: &str, state: TaskState) -> Self {
        Self {
            inner: Arc::new(SqliteStore::in_memory().expect("in-memory sqlite")),
            task: task.to_string(),
            state,
        }
    }
}

impl StateStore for UnreliableStore {
    fn save_flow(&self, flow: &StoredFlow) -> Result<()> {
        self.inner.save_flow(flow)
    }

    fn load_flow(&self, name: &str) -> Result<Option<StoredFlow>> {
        self.inner.load_flow(name)
    }

    fn list_flows(&self) -> Result<Vec<String>> {
        self.inner.list_flows()
    }

    fn delete_flow(&self, name: &str) -> Result<bool> {
        self.inner.delete_flow(name)
    }

    fn insert_run(&self, flow_name: &str, started_at: DateTime<Utc>) -> Result<RunId> {
        self.inner.insert_run(flow_name, started_at)
    }

    fn finish_run(
        &self,
        run_id: RunId,
        ended_at: DateTime<Utc>,
        outcome: RunOutcome,
    ) -> Result<()> {
        self.inner.finish_run(run_id, ended_at, outcome)
    }

    fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        self.inner.get_run(run_id)
    }

    fn insert_record(&self, record: &TaskRecord) -> Result<AttemptId> {
        self.inner.insert_record(record)
    }

    fn update_record(&self, record: &TaskRecord) -> Result<bool> {
        if record.task_name == self.task && record.state == self.state {
            return Err(ParadeError::Other(anyhow::anyhow!(
                "storage unreachable while recording '{}' as {}",
                record.task_name,
                record.state
            )));
        }
        self.inner.update_record(record)
    }

    fn get_record(&self, attempt_id: AttemptId) -> Result<Option<TaskRecord>> {
        self.inner.get_record(attempt_id)
    }

    fn last_success(&self, task_name: &str) -> Result<Option<TaskRecord>> {
        self.inner.last_success(task_name)
    }

    fn records_for_run(&self, run_id: RunId) -> Result<Vec<TaskRecord>> {
        self.inner.records_for_run(run_id)
    }

    fn records_for_task(&self, task_name: &str) -> Result<Vec<TaskRecord>> {
        self.inner.records_for_task(task_name)
    }
}
