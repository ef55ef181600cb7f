// src/config/mod.rs

//! Configuration loading and validation for parade.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate task shapes, durations and the dependency DAG (`validate.rs`).
//! - Turn the declarative descriptors into task and connection registries.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

use std::time::Duration;

use crate::connection::{ConnectionRegistry, TargetSink, TypeHints};
use crate::errors::{ParadeError, Result};
use crate::scheduler::{RunOptions, default_concurrency};
use crate::task::command::shell_task;
use crate::task::{TaskDefinition, TaskRegistry};
use crate::types::{ColumnType, WriteMode};

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{ConfigFile, ConfigSection, RawConfigFile, TargetConfig, TaskConfig};

impl ConfigFile {
    /// Effective concurrency limit.
    pub fn concurrency(&self) -> usize {
        self.config.concurrency.unwrap_or_else(default_concurrency)
    }

    /// Configured minimum grace window (zero when unset).
    pub fn grace(&self) -> Result<Duration> {
        match &self.config.grace {
            Some(g) => parse_duration(g).map_err(ParadeError::Config),
            None => Ok(Duration::ZERO),
        }
    }

    /// Run options seeded from `[config]`.
    pub fn run_options(&self) -> Result<RunOptions> {
        Ok(RunOptions::default()
            .with_concurrency(self.concurrency())
            .with_grace(self.grace()?))
    }

    /// Build the task and connection registries from the declared
    /// `[task.*]` and `[connection.*]` sections.
    pub fn build_registries(&self) -> Result<(TaskRegistry, ConnectionRegistry)> {
        let connections = ConnectionRegistry::new();
        for (name, descriptor) in &self.connection {
            connections.register(name.clone(), descriptor.clone())?;
        }

        let mut tasks = TaskRegistry::new();
        for (name, task) in &self.task {
            tasks.register(task_definition(name, task)?)?;
        }

        Ok((tasks, connections))
    }
}

fn task_definition(name: &str, task: &TaskConfig) -> Result<TaskDefinition> {
    let mut def = match (&task.cmd, &task.source, &task.query, &task.target) {
        (Some(cmd), _, _, _) => shell_task(name, cmd.clone()),
        (None, Some(source), Some(query), Some(target)) => {
            let mode = match &target.mode {
                Some(m) => m.parse::<WriteMode>().map_err(ParadeError::Config)?,
                None => WriteMode::default(),
            };
            let mut hints = TypeHints::new();
            for (column, ty) in &task.types {
                hints.insert(
                    column.clone(),
                    ty.parse::<ColumnType>().map_err(ParadeError::Config)?,
                );
            }
            let sink = TargetSink::new(target.connection.clone(), target.table.clone(), mode)
                .with_hints(hints);
            TaskDefinition::single_source_etl(name, source.clone(), query.clone(), sink)
        }
        _ => {
            return Err(ParadeError::Config(format!(
                "task '{name}' is neither a shell task nor a complete ETL task"
            )));
        }
    };

    def = def.depends_on(task.deps.iter().cloned());
    if let Some(timeout) = &task.timeout {
        def = def.timeout(parse_duration(timeout).map_err(ParadeError::Config)?);
    }
    if let Some(checkpoint) = &task.checkpoint {
        def = def.granularity(parse_duration(checkpoint).map_err(ParadeError::Config)?);
    }
    Ok(def)
}
