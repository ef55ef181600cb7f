// src/exec/worker.rs

//! Worker side of a task execution.
//!
//! A worker runs one task to completion and turns whatever happened into a
//! [`TaskOutcome`]:
//!
//! - checkpoint fresh and not forced: success without running the body
//! - body error: `Failed` with the classified kind and message
//! - timeout: the cancellation token is set, the body gets a grace window
//!   of `max(grace, timeout)` to return, then it is aborted; `Failed` with
//!   `Timeout` either way
//! - ETL body success: the dataset is committed to the sink; a write error
//!   is `Failed` with `CommitFailure`
//!
//! Errors never escape as panics or `Err`; only a recorder failure turns
//! into `TaskOutcome::Fatal`.

use std::time::Duration;

use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::connection::{Dataset, TargetSink};
use crate::context::TaskContext;
use crate::errors::{ErrorKind, classify};
use crate::recorder::{Attributes, SKIPPED, TIMEOUT_GRACE};
use crate::scheduler::{TaskOutcome, WorkerReport};
use crate::task::{BodyFuture, TaskKind};

/// One dispatched task.
#[derive(Debug, Clone)]
pub struct WorkerJob {
    pub task: String,
    pub ctx: TaskContext,
    pub force: bool,
    pub grace: Duration,
}

struct Failure {
    kind: ErrorKind,
    message: String,
}

impl Failure {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Aborts the body task and sets its token when the worker goes away
/// (normal completion included).
struct BodyGuard {
    abort: AbortHandle,
    cancel: tokio_util::sync::CancellationToken,
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.abort.abort();
    }
}

/// Execute one task and report the outcome.
pub async fn execute(job: WorkerJob) -> WorkerReport {
    let task = job.task.clone();
    let outcome = run(&job).await;
    WorkerReport { task, outcome }
}

async fn run(job: &WorkerJob) -> TaskOutcome {
    let ctx = &job.ctx;
    let definition = ctx.instance().definition().clone();
    let recorder = ctx.execution().recorder().clone();

    let checkpoint = match recorder.checkpoint(&job.task, definition.granularity) {
        Ok(c) => c,
        Err(e) => {
            return TaskOutcome::Fatal {
                message: format!("checkpoint lookup for task '{}' failed: {e}", job.task),
            };
        }
    };
    let mut attributes = checkpoint.to_attributes();

    if checkpoint.is_fresh() && !job.force {
        info!(
            task = %job.task,
            run_id = ctx.run_id(),
            checkpoint = %attributes_str(&attributes),
            "checkpoint already covered; skipping body"
        );
        attributes.insert(SKIPPED.to_string(), Value::Bool(true));
        return TaskOutcome::Succeeded {
            skipped: true,
            attributes,
        };
    }

    debug!(task = %job.task, run_id = ctx.run_id(), kind = definition.kind.label(), "running task body");

    let result = match &definition.kind {
        TaskKind::Generic(body) => {
            run_body(job, definition.timeout, body(ctx.clone()), &mut attributes).await
        }
        TaskKind::Etl { body, sink } => {
            match run_body(job, definition.timeout, body(ctx.clone()), &mut attributes).await {
                Ok(dataset) => commit(ctx, sink, dataset).await,
                Err(f) => Err(f),
            }
        }
        TaskKind::SingleSourceEtl {
            source,
            query,
            transform,
            sink,
        } => {
            let load = load_source(ctx.clone(), source.clone(), query.clone(), transform.clone());
            match run_body(job, definition.timeout, load, &mut attributes).await {
                Ok(dataset) => commit(ctx, sink, dataset).await,
                Err(f) => Err(f),
            }
        }
    };

    match result {
        Ok(()) => {
            let mut merged = ctx.instance().attributes().unwrap_or_default();
            merged.extend(attributes);
            TaskOutcome::Succeeded {
                skipped: false,
                attributes: merged,
            }
        }
        Err(failure) => {
            if let Err(e) = ctx.instance().clear_attributes() {
                warn!(task = %job.task, error = %e, "could not clear task attributes");
            }
            TaskOutcome::Failed {
                kind: failure.kind,
                message: failure.message,
                attributes,
            }
        }
    }
}

fn attributes_str(attributes: &Attributes) -> String {
    serde_json::to_string(attributes).unwrap_or_default()
}

/// Synthesised body of a single-source ETL task.
fn load_source(
    ctx: TaskContext,
    source: String,
    query: String,
    transform: Option<crate::task::Transform>,
) -> BodyFuture<Dataset> {
    Box::pin(async move {
        let conn = ctx.get_connection(&source)?;
        let dataset = tokio::task::spawn_blocking(move || conn.load_query(&query)).await??;
        match transform {
            Some(f) => f(dataset),
            None => Ok(dataset),
        }
    })
}

/// Run a body future on its own task under the task's timeout.
async fn run_body<T: Send + 'static>(
    job: &WorkerJob,
    timeout: Option<Duration>,
    body: BodyFuture<T>,
    attributes: &mut Attributes,
) -> Result<T, Failure> {
    let cancel = job.ctx.cancellation();
    let mut handle = tokio::spawn(body);
    let _guard = BodyGuard {
        abort: handle.abort_handle(),
        cancel: cancel.clone(),
    };

    let joined = match timeout {
        None => (&mut handle).await,
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                cancel.cancel();
                let grace = job.grace.max(limit);
                warn!(
                    task = %job.task,
                    timeout = ?limit,
                    grace = ?grace,
                    "task timed out; waiting for body to yield"
                );
                let verdict = match tokio::time::timeout(grace, &mut handle).await {
                    Ok(_) => "honoured",
                    Err(_) => {
                        handle.abort();
                        warn!(task = %job.task, "body did not yield within grace window; abandoned");
                        "abandoned"
                    }
                };
                attributes.insert(TIMEOUT_GRACE.to_string(), Value::String(verdict.to_string()));
                return Err(Failure::new(
                    ErrorKind::Timeout,
                    format!("task '{}' timed out after {limit:?}", job.task),
                ));
            }
        },
    };

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Failure::new(classify(&e), format!("{e:#}"))),
        Err(join) if join.is_panic() => Err(Failure::new(
            ErrorKind::BodyError,
            format!("task '{}' body panicked", job.task),
        )),
        Err(join) => Err(Failure::new(ErrorKind::BodyError, join.to_string())),
    }
}

/// Write an ETL result to its sink.
async fn commit(ctx: &TaskContext, sink: &TargetSink, dataset: Dataset) -> Result<(), Failure> {
    let conn = ctx
        .get_connection(&sink.connection)
        .map_err(|e| Failure::new(e.kind(), e.to_string()))?;

    let rows = dataset.len();
    let target = sink.clone();
    let written = tokio::task::spawn_blocking(move || {
        conn.store(&dataset, &target.table, target.mode, &target.type_hints)
    })
    .await;

    match written {
        Ok(Ok(())) => {
            info!(
                task = %ctx.task_name(),
                connection = %sink.connection,
                table = %sink.table,
                rows,
                "dataset committed"
            );
            Ok(())
        }
        Ok(Err(e)) => Err(Failure::new(
            ErrorKind::CommitFailure,
            format!("commit to {}.{} failed: {e}", sink.connection, sink.table),
        )),
        Err(join) => Err(Failure::new(
            ErrorKind::CommitFailure,
            format!("commit to {}.{} failed: {join}", sink.connection, sink.table),
        )),
    }
}
