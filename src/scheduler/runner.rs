// src/scheduler/runner.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::context::{ExecutionContext, TaskContext};
use crate::errors::{ParadeError, Result};
use crate::exec::{ExecutorBackend, WorkerJob};
use crate::recorder::RunOutcome;
use crate::scheduler::{RunOptions, RunState, RunSummary, TaskOutcome, WorkerReport};

/// Drives one run of a flow.
///
/// This is the IO shell around [`RunState`]: it owns the receiving end of
/// the result channel, invokes the context callbacks in the order the
/// transitions happen, and hands ready tasks to an `ExecutorBackend`. It is
/// the only writer of run state.
pub struct FlowRunner<E: ExecutorBackend> {
    ctx: Arc<ExecutionContext>,
    state: RunState,
    options: RunOptions,
    executor: E,
    results: mpsc::Receiver<WorkerReport>,
}

impl<E: ExecutorBackend> fmt::Debug for FlowRunner<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRunner")
            .field("ctx", &self.ctx)
            .field("state", &self.state)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> FlowRunner<E> {
    pub fn new(
        ctx: Arc<ExecutionContext>,
        options: RunOptions,
        executor: E,
        results: mpsc::Receiver<WorkerReport>,
    ) -> Self {
        let state = RunState::new(ctx.flow());
        Self {
            ctx,
            state,
            options,
            executor,
            results,
        }
    }

    /// Run the flow until every task is terminal.
    pub async fn run(mut self) -> RunSummary {
        let flow = self.ctx.flow().name().to_string();
        let run_id = self.ctx.run_id();
        info!(
            flow = %flow,
            run_id,
            tasks = self.state.total(),
            concurrency = self.options.concurrency,
            force = self.options.force,
            "run started"
        );

        match self.drive().await {
            Ok(()) => self.finish(),
            Err(e) => self.abort(e),
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let order = self.ctx.flow().topological_order().to_vec();
        for task in &order {
            self.ctx.on_task_pending(task)?;
        }

        let limit = self.options.concurrency.max(1);
        loop {
            while self.state.executing_len() < limit {
                let Some(task) = self.state.pop_ready() else {
                    break;
                };
                self.dispatch(task).await?;
            }

            if self.state.is_finished() {
                return Ok(());
            }

            if self.state.executing_len() == 0 {
                return Err(ParadeError::Other(anyhow::anyhow!(
                    "no task executing or ready but run not finished"
                )));
            }

            let report = self.results.recv().await.ok_or_else(|| {
                ParadeError::Other(anyhow::anyhow!("result channel closed with tasks in flight"))
            })?;
            self.apply(report)?;
        }
    }

    async fn dispatch(&mut self, task: String) -> Result<()> {
        self.ctx.on_task_start(&task)?;

        let instance = self.ctx.get_task(&task)?;
        let job = WorkerJob {
            task: task.clone(),
            ctx: TaskContext::new(
                Arc::clone(&self.ctx),
                instance,
                tokio_util::sync::CancellationToken::new(),
            ),
            force: self.options.force,
            grace: self.options.grace,
        };
        debug!(task = %task, run_id = self.ctx.run_id(), "dispatching task");
        self.executor.dispatch(job).await
    }

    fn apply(&mut self, report: WorkerReport) -> Result<()> {
        let WorkerReport { task, outcome } = report;
        match outcome {
            TaskOutcome::Succeeded {
                skipped,
                attributes,
            } => {
                self.ctx.on_task_success(&task, attributes, skipped)?;
                self.state.complete(&task, true);
            }
            TaskOutcome::Failed {
                kind,
                message,
                attributes,
            } => {
                self.ctx.on_task_failed(&task, kind, &message, attributes)?;
                let step = self.state.complete(&task, false);
                for (cancelled, failed_deps) in &step.newly_cancelled {
                    self.ctx.on_task_cancelled(cancelled, failed_deps)?;
                }
            }
            TaskOutcome::Fatal { message } => {
                return Err(ParadeError::Other(anyhow::anyhow!(
                    "worker for task '{task}' failed: {message}"
                )));
            }
        }
        Ok(())
    }

    fn finish(&self) -> RunSummary {
        let outcome = if self.state.is_success() {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };

        let recorded = match outcome {
            RunOutcome::Succeeded => self.ctx.on_flow_success(),
            RunOutcome::Failed => self.ctx.on_flow_failed(),
        };
        if let Err(e) = recorded {
            error!(run_id = self.ctx.run_id(), error = %e, "failed to record end of run");
            return RunSummary {
                outcome: RunOutcome::Failed,
                fatal: Some(e.to_string()),
            };
        }

        RunSummary {
            outcome,
            fatal: None,
        }
    }

    /// Scheduler-fatal path: cancel everything that is not terminal, stop
    /// workers and fail the run. Recorder writes are best effort here.
    fn abort(&mut self, cause: ParadeError) -> RunSummary {
        error!(
            flow = %self.ctx.flow().name(),
            run_id = self.ctx.run_id(),
            error = %cause,
            "scheduler-fatal error; aborting run"
        );

        self.executor.shutdown();
        self.results.close();

        let aborted = self.state.abort();
        debug!(aborted = ?aborted, "run state aborted");

        // Walk the instances rather than `aborted`: a cascade interrupted
        // half-way leaves tasks cancelled in run state but not yet recorded.
        for task in self.ctx.flow().topological_order() {
            if let Err(e) = self.ctx.abort_task(task) {
                warn!(task = %task, error = %e, "could not record scheduler-fatal cancellation");
            }
        }

        if let Err(e) = self.ctx.on_flow_failed() {
            warn!(run_id = self.ctx.run_id(), error = %e, "could not record failed run");
        }

        RunSummary {
            outcome: RunOutcome::Failed,
            fatal: Some(cause.to_string()),
        }
    }
}
