// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The flow runner hands each dispatched task to an `ExecutorBackend`
//! instead of spawning it directly. Production code uses
//! [`TokioExecutor`], which runs [`execute`](super::worker::execute) on a
//! Tokio task and sends the report over the result channel. Tests can
//! provide a backend that reports scripted outcomes without running
//! bodies at all.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::Result;
use crate::exec::worker::{WorkerJob, execute};
use crate::scheduler::WorkerReport;

/// Trait abstracting how dispatched tasks are executed.
pub trait ExecutorBackend: Send {
    /// Start executing one task. Must not wait for the task to finish;
    /// the outcome arrives later on the result channel.
    fn dispatch(&mut self, job: WorkerJob) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop any work still in flight (scheduler-fatal abort).
    fn shutdown(&mut self) {}
}

/// Runs each dispatched task on its own Tokio task.
pub struct TokioExecutor {
    tx: mpsc::Sender<WorkerReport>,
    workers: Vec<JoinHandle<()>>,
}

impl TokioExecutor {
    pub fn new(tx: mpsc::Sender<WorkerReport>) -> Self {
        Self {
            tx,
            workers: Vec::new(),
        }
    }
}

impl ExecutorBackend for TokioExecutor {
    fn dispatch(&mut self, job: WorkerJob) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.workers.retain(|h| !h.is_finished());

            let tx = self.tx.clone();
            let task = job.task.clone();
            let handle = tokio::spawn(async move {
                let report = execute(job).await;
                if tx.send(report).await.is_err() {
                    debug!(task = %task, "result channel closed; dropping report");
                }
            });
            self.workers.push(handle);
            Ok(())
        })
    }

    fn shutdown(&mut self) {
        for handle in self.workers.drain(..) {
            handle.abort();
        }
    }
}
