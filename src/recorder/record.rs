// src/recorder/record.rs

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorKind;
use crate::recorder::checkpoint::parse_checkpoint;
use crate::task::TaskState;

/// Monotonic run identifier assigned by the store.
pub type RunId = i64;

/// Identifier of one task execution attempt.
pub type AttemptId = i64;

/// Free-form attributes attached to a record.
pub type Attributes = BTreeMap<String, Value>;

pub const LAST_CHECKPOINT: &str = "last-checkpoint";
pub const CURRENT_CHECKPOINT: &str = "current-checkpoint";
pub const FAILED_DEPS: &str = "failed-deps";
pub const TIMEOUT_GRACE: &str = "timeout-grace";
pub const SKIPPED: &str = "skipped";

/// `failed-deps` value used when the scheduler itself aborted the run.
pub const SCHEDULER_FATAL: &str = "scheduler-fatal";

/// Persisted copy of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub attempt_id: AttemptId,
    pub run_id: RunId,
    pub task_name: String,
    pub flow_id: String,
    pub flow_name: String,
    pub state: TaskState,
    pub began_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<ErrorKind>,
    pub attributes: Attributes,
    pub error_message: Option<String>,
}

impl TaskRecord {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `current-checkpoint` attribute, if set to a timestamp.
    pub fn current_checkpoint(&self) -> Option<DateTime<Utc>> {
        self.attributes.get(CURRENT_CHECKPOINT).and_then(parse_checkpoint)
    }

    /// `last-checkpoint` attribute; `None` for "never" or when absent.
    pub fn last_checkpoint(&self) -> Option<DateTime<Utc>> {
        self.attributes.get(LAST_CHECKPOINT).and_then(parse_checkpoint)
    }

    /// Parents named in the `failed-deps` attribute of a cancelled record.
    pub fn failed_deps(&self) -> BTreeSet<String> {
        self.attributes
            .get(FAILED_DEPS)
            .and_then(Value::as_array)
            .map(|deps| {
                deps.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a success record was produced by the checkpoint skip.
    pub fn was_skipped(&self) -> bool {
        self.outcome == Some(ErrorKind::Skipped)
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(RunOutcome::Succeeded),
            "failed" => Some(RunOutcome::Failed),
            _ => None,
        }
    }
}

/// Persisted row of the runs table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub flow_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<RunOutcome>,
}
