// src/store/mod.rs

//! Durable state: flows, runs and task execution records.
//!
//! [`StateStore`] is the narrow persistence interface used by the
//! recorder and the flow store. [`SqliteStore`] is the shipped backend.
//! Every call is committed before it returns.

pub mod schema;
pub mod sqlite;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::recorder::{AttemptId, RunId, RunOutcome, RunRecord, TaskRecord};

pub use sqlite::SqliteStore;

/// Persisted shape of a flow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFlow {
    pub name: String,
    pub tasks: Vec<String>,
    /// child -> parents
    pub deps: BTreeMap<String, BTreeSet<String>>,
    pub created_at: DateTime<Utc>,
}

pub trait StateStore: Send + Sync {
    /// Insert or overwrite a flow definition.
    fn save_flow(&self, flow: &StoredFlow) -> Result<()>;
    fn load_flow(&self, name: &str) -> Result<Option<StoredFlow>>;
    /// Flow names, lexicographic.
    fn list_flows(&self) -> Result<Vec<String>>;
    /// Returns `false` if no such flow existed.
    fn delete_flow(&self, name: &str) -> Result<bool>;

    fn insert_run(&self, flow_name: &str, started_at: DateTime<Utc>) -> Result<RunId>;
    fn finish_run(&self, run_id: RunId, ended_at: DateTime<Utc>, outcome: RunOutcome)
    -> Result<()>;
    fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>>;

    /// Append a record; the store assigns `attempt_id` (the field on the
    /// argument is ignored).
    fn insert_record(&self, record: &TaskRecord) -> Result<AttemptId>;

    /// Overwrite the mutable columns of a record.
    ///
    /// Only non-terminal rows are updated; returns `false` when the row is
    /// missing or already terminal.
    fn update_record(&self, record: &TaskRecord) -> Result<bool>;
    fn get_record(&self, attempt_id: AttemptId) -> Result<Option<TaskRecord>>;

    /// Most recent succeeded record for `task_name`.
    fn last_success(&self, task_name: &str) -> Result<Option<TaskRecord>>;
    /// Records of one run, in attempt order.
    fn records_for_run(&self, run_id: RunId) -> Result<Vec<TaskRecord>>;
    /// Every record of one task, in attempt order.
    fn records_for_task(&self, task_name: &str) -> Result<Vec<TaskRecord>>;
}
