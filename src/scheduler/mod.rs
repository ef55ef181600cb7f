// src/scheduler/mod.rs

//! Flow scheduling.
//!
//! - [`state`] is the pure, synchronous run-state machine: which tasks
//!   are pending, ready, executing or terminal, and what a completion
//!   unlocks or cancels.
//! - [`step`] defines the result of feeding one completion into it.
//! - [`runner`] is the async shell: it owns the result channel, invokes
//!   the context callbacks and dispatches ready tasks to an
//!   [`ExecutorBackend`](crate::exec::ExecutorBackend).

pub mod runner;
pub mod state;
pub mod step;

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::errors::ErrorKind;
use crate::recorder::{Attributes, RunOutcome};

pub use runner::FlowRunner;
pub use state::{RunState, TaskRunState};
pub use step::SchedulerStep;

/// Result of one task execution, as reported by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded {
        /// Body not run because the checkpoint was fresh.
        skipped: bool,
        attributes: Attributes,
    },
    Failed {
        kind: ErrorKind,
        message: String,
        attributes: Attributes,
    },
    /// The worker could not do its job (e.g. recorder unreachable); the
    /// whole run is aborted.
    Fatal { message: String },
}

/// Message sent from a worker back to the scheduler.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub task: String,
    pub outcome: TaskOutcome,
}

/// Per-submit options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of tasks executing at once (at least 1).
    pub concurrency: usize,
    /// Run bodies even when the checkpoint says there is nothing new.
    pub force: bool,
    /// Minimum grace window granted to a timed-out body.
    pub grace: Duration,
    /// Keyword arguments per task name.
    pub task_args: BTreeMap<String, Value>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            force: false,
            grace: Duration::ZERO,
            task_args: BTreeMap::new(),
        }
    }
}

impl RunOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_task_args(mut self, task: impl Into<String>, args: Value) -> Self {
        self.task_args.insert(task.into(), args);
        self
    }
}

/// Hardware threads minus one, at least 1.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// How a run ended, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Set when the run was aborted by a scheduler-fatal error.
    pub fatal: Option<String>,
}
