// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `parade`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "parade",
    version,
    about = "Define task flows as DAGs and run them with checkpointed, idempotent reruns.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Parade.toml` in the current working directory; a missing
    /// default file means an empty configuration.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// SQLite state file; overrides `[config].state`.
    #[arg(long, global = true, value_name = "PATH")]
    pub state: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PARADE_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create, list, run and remove flows.
    #[command(subcommand)]
    Flow(FlowCommand),

    /// List and run registered tasks.
    #[command(subcommand)]
    Task(TaskCommand),
}

#[derive(Debug, Clone, Subcommand)]
pub enum FlowCommand {
    /// Validate and store a flow.
    Create {
        name: String,

        /// Member tasks.
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Dependency edge; repeatable.
        #[arg(long = "dep", value_name = "CHILD->PARENT")]
        deps: Vec<String>,
    },

    /// Print stored flow names, one per line.
    List,

    /// Run a stored flow; exits 0 only if every task succeeded.
    Run {
        name: String,

        /// Run task bodies even if their checkpoint is already covered.
        #[arg(long)]
        force: bool,

        /// Maximum number of tasks executing at once.
        #[arg(long, value_name = "N", value_parser = parse_concurrency)]
        concurrency: Option<usize>,
    },

    /// Remove a stored flow (no error if it does not exist).
    Remove { name: String },
}

#[derive(Debug, Clone, Subcommand)]
pub enum TaskCommand {
    /// Print registered task names, one per line.
    List,

    /// Run one task as a single-task flow.
    Run {
        name: String,

        #[arg(long)]
        force: bool,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_concurrency(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("concurrency must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid concurrency '{s}': {e}")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
