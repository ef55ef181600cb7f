// src/task/mod.rs

//! Task definitions.
//!
//! - [`state`] holds the lifecycle state machine and the live per-run
//!   [`TaskInstance`].
//! - [`registry`] maps task names to immutable definitions.
//! - [`command`] builds generic tasks that run a shell command.
//!
//! A task is one of three kinds: a generic body, an ETL body whose dataset
//! is committed to a target sink, or a single-source ETL that loads a query
//! from one connection and commits it to another.

pub mod command;
pub mod registry;
pub mod state;

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Dataset, TargetSink};
use crate::context::TaskContext;

pub use registry::TaskRegistry;
pub use state::{TaskInstance, TaskState};

/// Checkpoint alignment grid used when a task does not declare one.
pub const DEFAULT_GRANULARITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Future returned by a task body.
pub type BodyFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// Body of a generic task.
pub type GenericBody = Arc<dyn Fn(TaskContext) -> BodyFuture<()> + Send + Sync>;

/// Body of an ETL task; the returned dataset is committed to the sink.
pub type EtlBody = Arc<dyn Fn(TaskContext) -> BodyFuture<Dataset> + Send + Sync>;

/// Optional in-flight rewrite for single-source ETL tasks.
pub type Transform = Arc<dyn Fn(Dataset) -> anyhow::Result<Dataset> + Send + Sync>;

/// The three task shapes.
#[derive(Clone)]
pub enum TaskKind {
    Generic(GenericBody),
    Etl {
        body: EtlBody,
        sink: TargetSink,
    },
    SingleSourceEtl {
        source: String,
        query: String,
        transform: Option<Transform>,
        sink: TargetSink,
    },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Generic(_) => "generic",
            TaskKind::Etl { .. } => "etl",
            TaskKind::SingleSourceEtl { .. } => "single-source-etl",
        }
    }
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Generic(_) => f.write_str("Generic"),
            TaskKind::Etl { sink, .. } => f.debug_struct("Etl").field("sink", sink).finish_non_exhaustive(),
            TaskKind::SingleSourceEtl {
                source,
                query,
                sink,
                ..
            } => f
                .debug_struct("SingleSourceEtl")
                .field("source", source)
                .field("query", query)
                .field("sink", sink)
                .finish_non_exhaustive(),
        }
    }
}

/// Immutable description of a task, shared by every run that uses it.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    /// Tasks that must succeed before this one may execute.
    pub deps: BTreeSet<String>,
    pub timeout: Option<Duration>,
    /// Grid to which checkpoints are aligned.
    pub granularity: Duration,
    pub kind: TaskKind,
}

impl TaskDefinition {
    fn with_kind(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            deps: BTreeSet::new(),
            timeout: None,
            granularity: DEFAULT_GRANULARITY,
            kind,
        }
    }

    /// Generic task running `body`.
    pub fn generic<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: GenericBody = Arc::new(move |ctx: TaskContext| -> BodyFuture<()> { Box::pin(f(ctx)) });
        Self::with_kind(name, TaskKind::Generic(body))
    }

    /// ETL task whose dataset is written to `sink` after `body` succeeds.
    pub fn etl<F, Fut>(name: impl Into<String>, sink: TargetSink, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Dataset>> + Send + 'static,
    {
        let body: EtlBody =
            Arc::new(move |ctx: TaskContext| -> BodyFuture<Dataset> { Box::pin(f(ctx)) });
        Self::with_kind(name, TaskKind::Etl { body, sink })
    }

    /// ETL task loading `query` from the `source` connection.
    pub fn single_source_etl(
        name: impl Into<String>,
        source: impl Into<String>,
        query: impl Into<String>,
        sink: TargetSink,
    ) -> Self {
        Self::with_kind(
            name,
            TaskKind::SingleSourceEtl {
                source: source.into(),
                query: query.into(),
                transform: None,
                sink,
            },
        )
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn granularity(mut self, granularity: Duration) -> Self {
        self.granularity = granularity;
        self
    }

    /// Attach a transform to a single-source ETL task. No effect on the
    /// other kinds.
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Dataset) -> anyhow::Result<Dataset> + Send + Sync + 'static,
    {
        if let TaskKind::SingleSourceEtl { transform, .. } = &mut self.kind {
            *transform = Some(Arc::new(f));
        }
        self
    }

    /// Target sink for ETL kinds.
    pub fn sink(&self) -> Option<&TargetSink> {
        match &self.kind {
            TaskKind::Generic(_) => None,
            TaskKind::Etl { sink, .. } | TaskKind::SingleSourceEtl { sink, .. } => Some(sink),
        }
    }
}
