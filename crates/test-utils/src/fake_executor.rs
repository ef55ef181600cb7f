use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use parade::errors::{ErrorKind, ParadeError, Result};
use parade::exec::{ExecutorBackend, WorkerJob};
use parade::recorder::Attributes;
use parade::scheduler::{TaskOutcome, WorkerReport};
use tokio::sync::mpsc;

/// Shared, ordered list of task names an executor was asked to run.
#[derive(Debug, Clone, Default)]
pub struct DispatchLog(Arc<Mutex<Vec<String>>>);

impl DispatchLog {
    pub fn push(&self, task: &str) {
        self.0.lock().unwrap().push(task.to_string());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// A fake executor that:
/// - records which tasks were dispatched, in order
/// - never runs bodies
/// - immediately reports the scripted outcome for each task (success by
///   default)
pub struct FakeExecutor {
    tx: mpsc::Sender<WorkerReport>,
    dispatched: DispatchLog,
    script: HashMap<String, TaskOutcome>,
    hanging: HashSet<String>,
}

impl FakeExecutor {
    pub fn new(tx: mpsc::Sender<WorkerReport>, dispatched: DispatchLog) -> Self {
        Self {
            tx,
            dispatched,
            script: HashMap::new(),
            hanging: HashSet::new(),
        }
    }

    /// Report `task` as failed with a body error.
    pub fn fail(mut self, task: &str, message: &str) -> Self {
        self.script.insert(
            task.to_string(),
            TaskOutcome::Failed {
                kind: ErrorKind::BodyError,
                message: message.to_string(),
                attributes: Attributes::new(),
            },
        );
        self
    }

    /// Report a worker-level failure for `task`, aborting the run.
    pub fn fatal(mut self, task: &str, message: &str) -> Self {
        self.script.insert(
            task.to_string(),
            TaskOutcome::Fatal {
                message: message.to_string(),
            },
        );
        self
    }

    /// Never report anything for `task`.
    ///
    /// Only useful together with a fatal outcome elsewhere; otherwise the
    /// run waits forever.
    pub fn hang(mut self, task: &str) -> Self {
        self.hanging.insert(task.to_string());
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(&mut self, job: WorkerJob) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        self.dispatched.push(&job.task);
        let hang = self.hanging.contains(&job.task);
        let outcome = self.script.get(&job.task).cloned().unwrap_or_else(|| {
            TaskOutcome::Succeeded {
                skipped: false,
                attributes: Attributes::new(),
            }
        });

        Box::pin(async move {
            if hang {
                return Ok(());
            }
            tx.send(WorkerReport {
                task: job.task,
                outcome,
            })
            .await
            .map_err(|e| ParadeError::Other(anyhow::Error::from(e)))
        })
    }
}
