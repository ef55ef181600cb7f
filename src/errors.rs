// src/errors.rs

//! Crate-wide error type, error-kind taxonomy and result alias.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParadeError {
    #[error("Cycle detected in flow: {0}")]
    CyclicFlow(String),

    #[error("Task not registered: {0}")]
    UnknownTask(String),

    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Flow not found: {0}")]
    UnknownFlow(String),

    #[error("Invalid flow: {0}")]
    InvalidFlow(String),

    #[error("Connection not registered: {0}")]
    UnknownConnection(String),

    #[error("Connection '{name}' unavailable: {reason}")]
    ConnectionUnavailable { name: String, reason: String },

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Table not found: {0}")]
    UnknownTable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Type mismatch in column '{column}': {detail}")]
    TypeMismatch { column: String, detail: String },

    #[error("Invalid state transition for task '{task}': {from:?} -> {to:?}")]
    InvalidTransition {
        task: String,
        from: crate::task::TaskState,
        to: crate::task::TaskState,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParadeError {
    /// Classify this error into the kind recorded on a failed task.
    ///
    /// Connection errors keep their own kind; everything else raised from a
    /// task body counts as a body error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParadeError::CyclicFlow(_) => ErrorKind::CyclicFlow,
            ParadeError::UnknownTask(_) => ErrorKind::UnknownTask,
            ParadeError::UnknownConnection(_) => ErrorKind::UnknownConnection,
            ParadeError::ConnectionUnavailable { .. } => ErrorKind::ConnectionUnavailable,
            _ => ErrorKind::BodyError,
        }
    }
}

/// Classify an error returned by a task body.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    match err.downcast_ref::<ParadeError>() {
        Some(e) => e.kind(),
        None => ErrorKind::BodyError,
    }
}

/// Kinds of failure a task record can carry (plus the two success codes).
///
/// Serialized in kebab-case; this is the `outcome` column of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Ok,
    Skipped,
    CyclicFlow,
    UnknownTask,
    UnknownConnection,
    ConnectionUnavailable,
    Timeout,
    CommitFailure,
    BodyError,
    CancelledByDependency,
    SchedulerFatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Ok => "ok",
            ErrorKind::Skipped => "skipped",
            ErrorKind::CyclicFlow => "cyclic-flow",
            ErrorKind::UnknownTask => "unknown-task",
            ErrorKind::UnknownConnection => "unknown-connection",
            ErrorKind::ConnectionUnavailable => "connection-unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CommitFailure => "commit-failure",
            ErrorKind::BodyError => "body-error",
            ErrorKind::CancelledByDependency => "cancelled-by-dependency",
            ErrorKind::SchedulerFatal => "scheduler-fatal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "ok" => ErrorKind::Ok,
            "skipped" => ErrorKind::Skipped,
            "cyclic-flow" => ErrorKind::CyclicFlow,
            "unknown-task" => ErrorKind::UnknownTask,
            "unknown-connection" => ErrorKind::UnknownConnection,
            "connection-unavailable" => ErrorKind::ConnectionUnavailable,
            "timeout" => ErrorKind::Timeout,
            "commit-failure" => ErrorKind::CommitFailure,
            "body-error" => ErrorKind::BodyError,
            "cancelled-by-dependency" => ErrorKind::CancelledByDependency,
            "scheduler-fatal" => ErrorKind::SchedulerFatal,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ParadeError>;
