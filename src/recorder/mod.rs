// src/recorder/mod.rs

//! Checkpoint recorder.
//!
//! An append-only log of task execution records keyed by attempt id, plus
//! the run table. Every operation goes straight to the [`StateStore`],
//! which commits before returning, so a record is durable as soon as the
//! call that produced it has returned.
//!
//! Timestamps come from a [`Clock`] but are kept strictly increasing
//! across the whole recorder, so a child's `began_at` is always later
//! than its parent's `ended_at` even when the clock has not moved.

pub mod checkpoint;
pub mod clock;
pub mod record;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};

use crate::errors::{ErrorKind, ParadeError, Result};
use crate::store::StateStore;
use crate::task::TaskState;

pub use checkpoint::{Checkpoint, align};
pub use clock::{Clock, ManualClock, SystemClock};
pub use record::{
    AttemptId, Attributes, CURRENT_CHECKPOINT, FAILED_DEPS, LAST_CHECKPOINT, RunId, RunOutcome,
    RunRecord, SCHEDULER_FATAL, SKIPPED, TIMEOUT_GRACE, TaskRecord,
};

pub struct Recorder {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Recorder {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            last_stamp: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Current clock reading, unadjusted.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Next record timestamp: clock time truncated to microseconds, bumped
    /// past the previous stamp if needed.
    fn stamp(&self) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let now = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now);
        let mut last = self.last_stamp.lock().map_err(|_| ParadeError::LockPoisoned)?;
        let stamp = match *last {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        Ok(stamp)
    }

    pub fn last_success(&self, task_name: &str) -> Result<Option<TaskRecord>> {
        self.store.last_success(task_name)
    }

    /// Checkpoint pair for `task_name` as of now.
    pub fn checkpoint(&self, task_name: &str, granularity: Duration) -> Result<Checkpoint> {
        let last = self.last_success(task_name)?;
        Ok(Checkpoint::compute(last.as_ref(), self.clock.now(), granularity))
    }

    pub fn begin_run(&self, flow_name: &str) -> Result<RunId> {
        let started_at = self.stamp()?;
        let run_id = self.store.insert_run(flow_name, started_at)?;
        debug!(flow = %flow_name, run_id, "run started");
        Ok(run_id)
    }

    pub fn finish_run(&self, run_id: RunId, outcome: RunOutcome) -> Result<()> {
        let ended_at = self.stamp()?;
        self.store.finish_run(run_id, ended_at, outcome)?;
        debug!(run_id, outcome = outcome.as_str(), "run finished");
        Ok(())
    }

    pub fn run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        self.store.get_run(run_id)
    }

    pub fn records_for_run(&self, run_id: RunId) -> Result<Vec<TaskRecord>> {
        self.store.records_for_run(run_id)
    }

    /// Write the Pending record of a task and return its attempt id.
    pub fn on_pending(
        &self,
        task_name: &str,
        flow_id: &str,
        flow_name: &str,
        run_id: RunId,
        attributes: Attributes,
    ) -> Result<AttemptId> {
        let record = TaskRecord {
            attempt_id: 0,
            run_id,
            task_name: task_name.to_string(),
            flow_id: flow_id.to_string(),
            flow_name: flow_name.to_string(),
            state: TaskState::Pending,
            began_at: None,
            ended_at: None,
            outcome: None,
            attributes,
            error_message: None,
        };
        let attempt_id = self.store.insert_record(&record)?;
        trace!(task = %task_name, run_id, attempt_id, "recorded pending");
        Ok(attempt_id)
    }

    pub fn on_start(&self, attempt_id: AttemptId) -> Result<()> {
        let mut record = self.load(attempt_id)?;
        record.state = TaskState::Executing;
        record.began_at = Some(self.stamp()?);
        self.save(&record)?;
        trace!(task = %record.task_name, attempt_id, "recorded start");
        Ok(())
    }

    /// Record a success; `attributes` become the record's final attributes.
    pub fn on_success(&self, attempt_id: AttemptId, attributes: Attributes) -> Result<()> {
        let mut record = self.load(attempt_id)?;
        let skipped = attributes
            .get(SKIPPED)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        record.state = TaskState::Succeeded;
        record.ended_at = Some(self.stamp()?);
        record.outcome = Some(if skipped {
            ErrorKind::Skipped
        } else {
            ErrorKind::Ok
        });
        record.attributes = attributes;
        self.save(&record)?;
        trace!(task = %record.task_name, attempt_id, skipped, "recorded success");
        Ok(())
    }

    /// Record a failure; `attributes` must not carry body output.
    pub fn on_failure(
        &self,
        attempt_id: AttemptId,
        kind: ErrorKind,
        message: &str,
        attributes: Attributes,
    ) -> Result<()> {
        let mut record = self.load(attempt_id)?;
        record.state = TaskState::Failed;
        record.ended_at = Some(self.stamp()?);
        record.outcome = Some(kind);
        record.error_message = Some(message.to_string());
        record.attributes = attributes;
        self.save(&record)?;
        trace!(task = %record.task_name, attempt_id, kind = %kind, "recorded failure");
        Ok(())
    }

    /// Record a cancellation, keeping the pending attributes and adding
    /// `failed-deps`.
    pub fn on_cancelled(&self, attempt_id: AttemptId, failed_deps: &BTreeSet<String>) -> Result<()> {
        let mut record = self.load(attempt_id)?;
        let kind = if failed_deps.contains(SCHEDULER_FATAL) {
            ErrorKind::SchedulerFatal
        } else {
            ErrorKind::CancelledByDependency
        };
        record.state = TaskState::Cancelled;
        record.ended_at = Some(self.stamp()?);
        record.outcome = Some(kind);
        record.attributes.insert(
            FAILED_DEPS.to_string(),
            Value::Array(failed_deps.iter().cloned().map(Value::String).collect()),
        );
        self.save(&record)?;
        trace!(task = %record.task_name, attempt_id, "recorded cancellation");
        Ok(())
    }

    fn load(&self, attempt_id: AttemptId) -> Result<TaskRecord> {
        self.store.get_record(attempt_id)?.ok_or_else(|| {
            ParadeError::Other(anyhow::anyhow!("no record for attempt {attempt_id}"))
        })
    }

    fn save(&self, record: &TaskRecord) -> Result<()> {
        if self.store.update_record(record)? {
            Ok(())
        } else {
            Err(ParadeError::Other(anyhow::anyhow!(
                "record {} of task '{}' is already terminal",
                record.attempt_id,
                record.task_name
            )))
        }
    }
}
