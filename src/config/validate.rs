// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile, TaskConfig};
use crate::errors::{ParadeError, Result};
use crate::flow::validate::ensure_acyclic;
use crate::types::{ColumnType, WriteMode};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::ParadeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.connection, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_global_config(cfg)?;
    validate_connections(cfg)?;
    for (name, task) in &cfg.task {
        validate_task(name, task)?;
    }
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> ParadeError {
    ParadeError::Config(msg.into())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.concurrency == Some(0) {
        return Err(config_error("[config].concurrency must be >= 1 (got 0)"));
    }
    if let Some(grace) = &cfg.config.grace {
        parse_duration(grace).map_err(|e| config_error(format!("[config].grace: {e}")))?;
    }
    Ok(())
}

fn validate_connections(cfg: &RawConfigFile) -> Result<()> {
    for (name, conn) in &cfg.connection {
        if conn.kind.trim().is_empty() {
            return Err(config_error(format!(
                "connection '{name}' must declare a non-empty `kind`"
            )));
        }
    }
    Ok(())
}

fn validate_task(name: &str, task: &TaskConfig) -> Result<()> {
    let is_etl = task.source.is_some() || task.query.is_some();
    match (&task.cmd, is_etl) {
        (Some(_), true) => {
            return Err(config_error(format!(
                "task '{name}' sets both `cmd` and `source`/`query`; pick one"
            )));
        }
        (None, false) => {
            return Err(config_error(format!(
                "task '{name}' needs either `cmd` or `source` + `query`"
            )));
        }
        (Some(cmd), false) if cmd.trim().is_empty() => {
            return Err(config_error(format!("task '{name}' has an empty `cmd`")));
        }
        _ => {}
    }

    if is_etl {
        if task.source.is_none() || task.query.is_none() {
            return Err(config_error(format!(
                "task '{name}' must set both `source` and `query`"
            )));
        }
        let Some(target) = &task.target else {
            return Err(config_error(format!(
                "task '{name}' loads from `source` but has no `target`"
            )));
        };
        if let Some(mode) = &target.mode {
            mode.parse::<WriteMode>()
                .map_err(|e| config_error(format!("task '{name}': {e}")))?;
        }
    } else if task.target.is_some() || !task.types.is_empty() {
        return Err(config_error(format!(
            "task '{name}' sets `target`/`types` but is not an ETL task"
        )));
    }

    for (column, ty) in &task.types {
        ty.parse::<ColumnType>()
            .map_err(|e| config_error(format!("task '{name}', column '{column}': {e}")))?;
    }

    if let Some(timeout) = &task.timeout {
        let d = parse_duration(timeout)
            .map_err(|e| config_error(format!("task '{name}' `timeout`: {e}")))?;
        if d.is_zero() {
            return Err(config_error(format!("task '{name}' `timeout` must be > 0")));
        }
    }
    if let Some(checkpoint) = &task.checkpoint {
        let d = parse_duration(checkpoint)
            .map_err(|e| config_error(format!("task '{name}' `checkpoint`: {e}")))?;
        if d.is_zero() {
            return Err(config_error(format!(
                "task '{name}' `checkpoint` must be > 0"
            )));
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in &cfg.task {
        for dep in &task.deps {
            if dep == name {
                return Err(config_error(format!(
                    "task '{name}' cannot depend on itself in `deps`"
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(config_error(format!(
                    "task '{name}' has unknown dependency '{dep}' in `deps`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    let tasks: Vec<String> = cfg.task.keys().cloned().collect();
    let deps: BTreeMap<String, BTreeSet<String>> = cfg
        .task
        .iter()
        .map(|(name, task)| (name.clone(), task.deps.iter().cloned().collect()))
        .collect();
    ensure_acyclic(&tasks, &deps)
}
