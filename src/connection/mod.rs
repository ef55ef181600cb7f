// src/connection/mod.rs

//! Named handles to external data stores.
//!
//! - [`dataset`] defines the untyped tabular data exchanged with stores.
//! - [`memory`] is the in-process adapter shipped with the engine.
//! - [`registry`] maps connection names to descriptors and opened handles.
//!
//! Orchestration never talks to a store directly: task bodies and the ETL
//! commit step go through a [`Connection`] handle obtained from the
//! execution context.

pub mod dataset;
pub mod memory;
pub mod registry;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::types::WriteMode;

pub use dataset::{Dataset, Row, TypeHints};
pub use memory::MemoryConnection;
pub use registry::{ConnectionDescriptor, ConnectionFactory, ConnectionRegistry, MemoryFactory};

/// Adapter interface every data store implements.
///
/// Implementations own their own synchronisation; the registry hands out
/// shared `Arc<dyn Connection>` handles that several workers may use at
/// the same time.
pub trait Connection: Send + Sync + Debug {
    /// Registered name of this connection.
    fn name(&self) -> &str;

    /// Load a whole table.
    fn load(&self, table: &str) -> Result<Dataset>;

    /// Load the result of a query expressed in the adapter's dialect.
    fn load_query(&self, query: &str) -> Result<Dataset>;

    /// Write `dataset` into `table`.
    ///
    /// `WriteMode::Fail` must return `ParadeError::TableExists` when the
    /// table is already present. Nothing is written when the call fails.
    fn store(
        &self,
        dataset: &Dataset,
        table: &str,
        mode: WriteMode,
        hints: &TypeHints,
    ) -> Result<()>;

    fn table_exists(&self, table: &str) -> Result<bool>;
}

/// Where an ETL task writes its output after the body succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSink {
    pub connection: String,
    pub table: String,
    #[serde(default)]
    pub mode: WriteMode,
    #[serde(default)]
    pub type_hints: TypeHints,
}

impl TargetSink {
    pub fn new(connection: impl Into<String>, table: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            connection: connection.into(),
            table: table.into(),
            mode,
            type_hints: TypeHints::new(),
        }
    }

    pub fn with_hints(mut self, hints: TypeHints) -> Self {
        self.type_hints = hints;
        self
    }
}
