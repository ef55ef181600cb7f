// src/context.rs

//! Per-run execution context.
//!
//! One [`ExecutionContext`] is created for each submitted run and shared
//! (behind an `Arc`) by the scheduler and every worker of that run. It
//! carries the flow, the recorder, both registries, the live task
//! instances and a run-scoped key/value store.
//!
//! The `on_task_*` / `on_flow_*` callbacks are invoked by the scheduler
//! only. Each one validates the transition, writes the recorder, then
//! commits the in-memory state and notifies observers, so an instance
//! never runs ahead of its persisted record.
//!
//! Task bodies see a [`TaskContext`]: the shared context plus their own
//! instance and cancellation token.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionRegistry};
use crate::errors::{ErrorKind, ParadeError, Result};
use crate::flow::Flow;
use crate::recorder::{AttemptId, Attributes, Recorder, RunId, RunOutcome, SCHEDULER_FATAL};
use crate::task::{TaskInstance, TaskRegistry, TaskState};

/// A task lifecycle transition, as delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub flow: String,
    pub run_id: RunId,
    pub task: String,
    pub state: TaskState,
    pub outcome: Option<ErrorKind>,
    pub message: Option<String>,
}

/// End of a run, as delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowEvent {
    pub flow: String,
    pub run_id: RunId,
    pub outcome: RunOutcome,
}

/// Subscriber to run events.
///
/// Calls are fire-and-forget: an error or panic is logged and otherwise
/// ignored.
pub trait FlowObserver: Send + Sync {
    fn on_task_event(&self, _event: &TaskEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_flow_event(&self, _event: &FlowEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct ExecutionContext {
    flow_id: String,
    run_id: RunId,
    flow: Arc<Flow>,
    recorder: Arc<Recorder>,
    connections: Arc<ConnectionRegistry>,
    tasks: Arc<TaskRegistry>,
    instances: BTreeMap<String, Arc<TaskInstance>>,
    values: Mutex<HashMap<String, Value>>,
    observers: Vec<Arc<dyn FlowObserver>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("flow_id", &self.flow_id)
            .field("run_id", &self.run_id)
            .field("flow", &self.flow.name())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flow_id: String,
        run_id: RunId,
        flow: Arc<Flow>,
        recorder: Arc<Recorder>,
        connections: Arc<ConnectionRegistry>,
        tasks: Arc<TaskRegistry>,
        observers: Vec<Arc<dyn FlowObserver>>,
        task_args: &BTreeMap<String, Value>,
    ) -> Result<Self> {
        let mut instances = BTreeMap::new();
        for name in flow.tasks() {
            let def = flow
                .definition(name)
                .cloned()
                .ok_or_else(|| ParadeError::UnknownTask(name.clone()))?;
            let args = task_args.get(name).cloned().unwrap_or(Value::Null);
            instances.insert(name.clone(), Arc::new(TaskInstance::new(def, args)));
        }

        Ok(Self {
            flow_id,
            run_id,
            flow,
            recorder,
            connections,
            tasks,
            instances,
            values: Mutex::new(HashMap::new()),
            observers,
        })
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn get_connection(&self, name: &str) -> Result<Arc<dyn Connection>> {
        self.connections.get(name)
    }

    /// Live instance of a task of this run.
    pub fn get_task(&self, name: &str) -> Result<Arc<TaskInstance>> {
        self.instances
            .get(name)
            .cloned()
            .ok_or_else(|| ParadeError::UnknownTask(name.to_string()))
    }

    pub fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().map_err(|_| ParadeError::LockPoisoned)?;
        Ok(values.get(key).cloned())
    }

    pub fn set_value(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| ParadeError::LockPoisoned)?;
        values.insert(key.into(), value);
        Ok(())
    }

    pub fn on_task_pending(&self, name: &str) -> Result<()> {
        let instance = self.get_task(name)?;
        instance.ensure_transition(TaskState::Pending)?;

        let granularity = instance.definition().granularity;
        let checkpoint = self.recorder.checkpoint(name, granularity)?;
        let attempt_id = self.recorder.on_pending(
            name,
            &self.flow_id,
            self.flow.name(),
            self.run_id,
            checkpoint.to_attributes(),
        )?;
        instance.set_attempt_id(attempt_id)?;
        instance.transition(TaskState::Pending)?;

        self.notify_task(name, TaskState::Pending, None, None);
        Ok(())
    }

    pub fn on_task_start(&self, name: &str) -> Result<()> {
        let instance = self.get_task(name)?;
        instance.ensure_transition(TaskState::Executing)?;
        self.recorder.on_start(attempt_of(&instance)?)?;
        instance.transition(TaskState::Executing)?;

        debug!(flow = %self.flow.name(), run_id = self.run_id, task = %name, "task started");
        self.notify_task(name, TaskState::Executing, None, None);
        Ok(())
    }

    pub fn on_task_success(&self, name: &str, attributes: Attributes, skipped: bool) -> Result<()> {
        let instance = self.get_task(name)?;
        instance.ensure_transition(TaskState::Succeeded)?;
        self.recorder.on_success(attempt_of(&instance)?, attributes)?;
        instance.transition(TaskState::Succeeded)?;

        info!(flow = %self.flow.name(), run_id = self.run_id, task = %name, skipped, "task succeeded");
        let outcome = if skipped {
            ErrorKind::Skipped
        } else {
            ErrorKind::Ok
        };
        self.notify_task(name, TaskState::Succeeded, Some(outcome), None);
        Ok(())
    }

    pub fn on_task_failed(
        &self,
        name: &str,
        kind: ErrorKind,
        message: &str,
        attributes: Attributes,
    ) -> Result<()> {
        let instance = self.get_task(name)?;
        instance.ensure_transition(TaskState::Failed)?;
        self.recorder
            .on_failure(attempt_of(&instance)?, kind, message, attributes)?;
        instance.transition(TaskState::Failed)?;

        warn!(
            flow = %self.flow.name(),
            run_id = self.run_id,
            task = %name,
            kind = %kind,
            error = %message,
            "task failed"
        );
        self.notify_task(name, TaskState::Failed, Some(kind), Some(message.to_string()));
        Ok(())
    }

    pub fn on_task_cancelled(&self, name: &str, failed_deps: &BTreeSet<String>) -> Result<()> {
        let instance = self.get_task(name)?;
        instance.ensure_transition(TaskState::Cancelled)?;
        self.recorder
            .on_cancelled(attempt_of(&instance)?, failed_deps)?;
        instance.transition(TaskState::Cancelled)?;

        info!(
            flow = %self.flow.name(),
            run_id = self.run_id,
            task = %name,
            failed_deps = ?failed_deps,
            "task cancelled"
        );
        self.notify_task(
            name,
            TaskState::Cancelled,
            Some(ErrorKind::CancelledByDependency),
            None,
        );
        Ok(())
    }

    /// Scheduler-fatal abort of one task: force it to Cancelled with
    /// `failed-deps = {"scheduler-fatal"}`.
    ///
    /// The in-memory state is forced even if the recorder write fails.
    pub fn abort_task(&self, name: &str) -> Result<()> {
        let instance = self.get_task(name)?;
        if instance.state()?.is_terminal() {
            return Ok(());
        }

        let failed_deps = BTreeSet::from([SCHEDULER_FATAL.to_string()]);
        let recorded = match instance.attempt_id()? {
            Some(attempt_id) => self.recorder.on_cancelled(attempt_id, &failed_deps),
            None => self
                .recorder
                .on_pending(
                    name,
                    &self.flow_id,
                    self.flow.name(),
                    self.run_id,
                    Attributes::new(),
                )
                .and_then(|attempt_id| {
                    instance.set_attempt_id(attempt_id)?;
                    self.recorder.on_cancelled(attempt_id, &failed_deps)
                }),
        };
        instance.abort()?;

        self.notify_task(
            name,
            TaskState::Cancelled,
            Some(ErrorKind::SchedulerFatal),
            None,
        );
        recorded
    }

    pub fn on_flow_success(&self) -> Result<()> {
        self.finish(RunOutcome::Succeeded)
    }

    pub fn on_flow_failed(&self) -> Result<()> {
        self.finish(RunOutcome::Failed)
    }

    fn finish(&self, outcome: RunOutcome) -> Result<()> {
        let recorded = self.recorder.finish_run(self.run_id, outcome);
        info!(
            flow = %self.flow.name(),
            run_id = self.run_id,
            outcome = outcome.as_str(),
            "flow finished"
        );

        let event = FlowEvent {
            flow: self.flow.name().to_string(),
            run_id: self.run_id,
            outcome,
        };
        for observer in &self.observers {
            deliver("flow", || observer.on_flow_event(&event));
        }
        recorded
    }

    fn notify_task(
        &self,
        task: &str,
        state: TaskState,
        outcome: Option<ErrorKind>,
        message: Option<String>,
    ) {
        if self.observers.is_empty() {
            return;
        }
        let event = TaskEvent {
            flow: self.flow.name().to_string(),
            run_id: self.run_id,
            task: task.to_string(),
            state,
            outcome,
            message,
        };
        for observer in &self.observers {
            deliver("task", || observer.on_task_event(&event));
        }
    }
}

fn attempt_of(instance: &TaskInstance) -> Result<AttemptId> {
    instance.attempt_id()?.ok_or_else(|| {
        ParadeError::Other(anyhow::anyhow!(
            "task '{}' has no pending record",
            instance.name()
        ))
    })
}

fn deliver(what: &str, f: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(event = what, error = %e, "observer returned an error; ignoring"),
        Err(_) => warn!(event = what, "observer panicked; ignoring"),
    }
}

/// What a task body sees of its run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    exec: Arc<ExecutionContext>,
    instance: Arc<TaskInstance>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(
        exec: Arc<ExecutionContext>,
        instance: Arc<TaskInstance>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            exec,
            instance,
            cancel,
        }
    }

    pub fn task_name(&self) -> &str {
        self.instance.name()
    }

    pub fn run_id(&self) -> RunId {
        self.exec.run_id()
    }

    pub fn flow_id(&self) -> &str {
        self.exec.flow_id()
    }

    pub fn flow_name(&self) -> &str {
        self.exec.flow().name()
    }

    pub fn execution(&self) -> &Arc<ExecutionContext> {
        &self.exec
    }

    pub fn instance(&self) -> &Arc<TaskInstance> {
        &self.instance
    }

    pub fn get_connection(&self, name: &str) -> Result<Arc<dyn Connection>> {
        self.exec.get_connection(name)
    }

    pub fn get_task(&self, name: &str) -> Result<Arc<TaskInstance>> {
        self.exec.get_task(name)
    }

    /// Keyword arguments passed for this task at submit time.
    pub fn args(&self) -> &Value {
        self.instance.args()
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.instance.args().get(key)
    }

    /// Attach an attribute to this task's success record. Dropped if the
    /// task fails.
    pub fn set_attribute(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.instance.set_attribute(key, value)
    }

    /// Token set when the task's timeout elapses.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn get_value(&self, key: &str) -> Result<Option<Value>> {
        self.exec.get_value(key)
    }

    pub fn set_value(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.exec.set_value(key, value)
    }
}
