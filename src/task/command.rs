// src/task/command.rs

//! Generic tasks that run a shell command.

use std::process::Stdio;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::context::TaskContext;
use crate::task::TaskDefinition;

/// Build a generic task whose body runs `cmd` through the platform shell.
pub fn shell_task(name: impl Into<String>, cmd: impl Into<String>) -> TaskDefinition {
    let cmd = cmd.into();
    TaskDefinition::generic(name, move |ctx| {
        let cmd = cmd.clone();
        async move { run_command(&ctx, &cmd).await }
    })
}

/// Run a single shell command for a task.
///
/// - stdout lines are logged at info, stderr lines at debug.
/// - When the task's cancellation token fires (timeout), the child is
///   killed and the body returns an error.
/// - A non-zero exit status is an error carrying the exit code.
pub async fn run_command(ctx: &TaskContext, cmd: &str) -> anyhow::Result<()> {
    let task = ctx.task_name().to_string();
    let run_id = ctx.run_id();

    info!(task = %task, run_id, cmd = %cmd, "starting task process");

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for task '{task}'"))?;

    if let Some(stdout) = child.stdout.take() {
        let task = task.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(task = %task, run_id, "stdout: {}", line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let task = task.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task, run_id, "stderr: {}", line);
            }
        });
    }

    let cancel = ctx.cancellation();

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for process of task '{task}'"))?;
            let code = status.code().unwrap_or(-1);

            info!(task = %task, run_id, exit_code = code, success = status.success(), "task process exited");

            if !status.success() {
                bail!("command `{cmd}` exited with code {code}");
            }
            Ok(())
        }

        _ = cancel.cancelled() => {
            info!(task = %task, run_id, "cancellation requested; killing task process");
            if let Err(e) = child.kill().await {
                warn!(task = %task, run_id, error = %e, "failed to kill child process on cancellation");
            }
            bail!("command `{cmd}` cancelled")
        }
    }
}
