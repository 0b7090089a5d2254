//! Verification command execution.

use std::fs::File;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use pbisect_config::log_runner_debug;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::{Result, RuntimeError};

/// How a verification command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exited on its own with this code
    Exited(i32),
    /// Terminated by a signal it did not get from us
    Signaled(i32),
    /// Killed because the probe was cancelled
    Cancelled,
}

impl From<ExitStatus> for CommandStatus {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return CommandStatus::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            CommandStatus::Signaled(status.signal().unwrap_or(-1))
        }
        #[cfg(not(unix))]
        {
            CommandStatus::Signaled(-1)
        }
    }
}

/// Runs a command line inside a workspace.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `argv` with `cwd` as working directory.
    ///
    /// Output goes to `output` when given, otherwise it is discarded. The
    /// process is killed as soon as `cancel` fires.
    async fn run(
        &self,
        cwd: &Path,
        argv: &[String],
        output: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<CommandStatus>;
}

/// Executor spawning real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(
        &self,
        cwd: &Path,
        argv: &[String],
        output: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<CommandStatus> {
        let (program, args) = argv.split_first().ok_or(RuntimeError::EmptyCommand)?;
        if cancel.is_cancelled() {
            return Ok(CommandStatus::Cancelled);
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let log = File::create(path)?;
                cmd.stdout(log.try_clone()?).stderr(log);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
            program: program.clone(),
            source,
        })?;
        log_runner_debug!(
            "Command started",
            pid = child.id(),
            cwd = tracing::field::display(cwd.display()),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // kill() also reaps the child
                if let Err(e) = child.kill().await {
                    log_runner_debug!(
                        "Kill after cancellation failed",
                        error = tracing::field::display(&e),
                    );
                }
                Ok(CommandStatus::Cancelled)
            }
            status = child.wait() => Ok(CommandStatus::from(status?)),
        }
    }
}
