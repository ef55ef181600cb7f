// src/task/state.rs

//! Task lifecycle state and the live per-run task instance.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::errors::{ParadeError, Result};
use crate::recorder::{AttemptId, Attributes};
use crate::task::TaskDefinition;

/// Lifecycle state of a task within one run.
///
/// ```text
/// Init -> Pending -> Executing -> Succeeded
///            |           \-----> Failed
///            \-> Cancelled
/// ```
///
/// Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Init,
    Pending,
    Executing,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether `self -> next` is a regular lifecycle transition.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Init, TaskState::Pending)
                | (TaskState::Pending, TaskState::Executing)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::Executing, TaskState::Succeeded)
                | (TaskState::Executing, TaskState::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Init => "init",
            TaskState::Pending => "pending",
            TaskState::Executing => "executing",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init" => Some(TaskState::Init),
            "pending" => Some(TaskState::Pending),
            "executing" => Some(TaskState::Executing),
            "succeeded" => Some(TaskState::Succeeded),
            "failed" => Some(TaskState::Failed),
            "cancelled" => Some(TaskState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live task within one run.
///
/// The scheduler drives `state`; the worker running the task is the only
/// writer of `attributes` while the task executes. Both are read by the
/// recorder on terminal transitions.
#[derive(Debug)]
pub struct TaskInstance {
    definition: Arc<TaskDefinition>,
    args: Value,
    state: Mutex<TaskState>,
    attempt_id: Mutex<Option<AttemptId>>,
    attributes: Mutex<Attributes>,
}

impl TaskInstance {
    pub fn new(definition: Arc<TaskDefinition>, args: Value) -> Self {
        Self {
            definition,
            args,
            state: Mutex::new(TaskState::Init),
            attempt_id: Mutex::new(None),
            attributes: Mutex::new(Attributes::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<TaskDefinition> {
        &self.definition
    }

    /// Per-task keyword arguments passed to `submit` (`null` if none).
    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn state(&self) -> Result<TaskState> {
        Ok(*lock(&self.state)?)
    }

    /// Fail unless `to` is a legal next state.
    pub fn ensure_transition(&self, to: TaskState) -> Result<()> {
        let from = *lock(&self.state)?;
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(ParadeError::InvalidTransition {
                task: self.name().to_string(),
                from,
                to,
            })
        }
    }

    /// Move to `to`, enforcing the lifecycle rules.
    pub fn transition(&self, to: TaskState) -> Result<()> {
        let mut state = lock(&self.state)?;
        if !state.can_transition_to(to) {
            return Err(ParadeError::InvalidTransition {
                task: self.name().to_string(),
                from: *state,
                to,
            });
        }
        trace!(task = %self.name(), from = %*state, to = %to, "task transition");
        *state = to;
        Ok(())
    }

    /// Force a non-terminal task to `Cancelled` (scheduler abort path).
    ///
    /// Returns `false` if the task had already reached a terminal state.
    pub fn abort(&self) -> Result<bool> {
        let mut state = lock(&self.state)?;
        if state.is_terminal() {
            return Ok(false);
        }
        *state = TaskState::Cancelled;
        Ok(true)
    }

    pub fn attempt_id(&self) -> Result<Option<AttemptId>> {
        Ok(*lock(&self.attempt_id)?)
    }

    pub fn set_attempt_id(&self, id: AttemptId) -> Result<()> {
        *lock(&self.attempt_id)? = Some(id);
        Ok(())
    }

    /// Snapshot of the attributes set by the task body.
    pub fn attributes(&self) -> Result<Attributes> {
        Ok(lock(&self.attributes)?.clone())
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) -> Result<()> {
        lock(&self.attributes)?.insert(key.into(), value);
        Ok(())
    }

    /// Drop any body-set attributes (a failed task keeps none of them).
    pub fn clear_attributes(&self) -> Result<()> {
        lock(&self.attributes)?.clear();
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| ParadeError::LockPoisoned)
}
