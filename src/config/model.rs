// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::connection::ConnectionDescriptor;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// state = ".parade/state.db"
/// concurrency = 3
/// grace = "5s"
///
/// [connection.warehouse]
/// kind = "memory"
///
/// [task.extract]
/// cmd = "echo extracting"
/// timeout = "30s"
///
/// [task.copy_orders]
/// source = "warehouse"
/// query = "select * from orders"
/// target = { connection = "warehouse", table = "orders_copy", mode = "replace" }
/// types = { id = "integer" }
/// deps = ["extract"]
/// ```
///
/// All sections are optional. This is the raw, unvalidated form; the rest
/// of the crate works with [`ConfigFile`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All connections from `[connection.<name>]`.
    #[serde(default)]
    pub connection: BTreeMap<String, ConnectionDescriptor>,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration. Only built through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub connection: BTreeMap<String, ConnectionDescriptor>,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        connection: BTreeMap<String, ConnectionDescriptor>,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            config,
            connection,
            task,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// SQLite file holding flows, runs and records.
    #[serde(default = "default_state_path")]
    pub state: PathBuf,

    /// Default concurrency limit; `None` means hardware threads - 1.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Minimum grace window after a timeout, e.g. `"5s"`.
    #[serde(default)]
    pub grace: Option<String>,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".parade/state.db")
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            state: default_state_path(),
            concurrency: None,
            grace: None,
        }
    }
}

/// `[task.<name>]` section.
///
/// Either `cmd` (shell task) or `source` + `query` + `target`
/// (single-source ETL).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    /// Shell command for a generic task.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Connection to load from.
    #[serde(default)]
    pub source: Option<String>,

    /// Query run against `source`.
    #[serde(default)]
    pub query: Option<String>,

    /// Where the loaded dataset is written.
    #[serde(default)]
    pub target: Option<TargetConfig>,

    /// Column type hints for the write, e.g. `{ id = "integer" }`.
    #[serde(default)]
    pub types: BTreeMap<String, String>,

    /// Tasks that must succeed first.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Duration string, e.g. `"30s"`.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Checkpoint granularity, e.g. `"24h"` or `"1d"`.
    #[serde(default)]
    pub checkpoint: Option<String>,
}

/// `target = { connection, table, mode }`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub connection: String,
    pub table: String,
    #[serde(default)]
    pub mode: Option<String>,
}
