// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`worker`] runs one task: checkpoint skip, body under timeout and
//!   grace window, ETL commit, and classification of the result.
//! - [`backend`] provides the `ExecutorBackend` trait and the Tokio-based
//!   `TokioExecutor` the runner uses in production, and which tests can
//!   replace with a fake implementation.

pub mod backend;
pub mod worker;

pub use backend::{ExecutorBackend, TokioExecutor};
pub use worker::{WorkerJob, execute};
