//! Shell command execution on the assist board.
//!
//! Commands run as `<shell> -c <command line>`. Their stdout and stderr are
//! appended to the console log so the DUT can collect them afterwards.

use super::console_log::ConsoleLog;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default shell used to interpret command lines.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Runs command lines through a shell.
#[derive(Debug, Clone)]
pub struct Executor {
    shell: PathBuf,
    console: ConsoleLog,
}

impl Executor {
    pub fn new(shell: impl Into<PathBuf>, console: ConsoleLog) -> Self {
        Self {
            shell: shell.into(),
            console,
        }
    }

    /// Run a command to completion with its output appended to the console log.
    ///
    /// Returns the process exit code, `-1` if it was killed by a signal.
    pub async fn run(&self, command: &str) -> io::Result<i32> {
        let status = self.logged(command)?.status().await?;
        let code = exit_code(status);
        debug!(command, code, "Command finished");
        Ok(code)
    }

    /// Run a command to completion, discarding its output.
    pub async fn run_quiet(&self, command: &str) -> io::Result<i32> {
        let status = self
            .shell_command(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(exit_code(status))
    }

    /// Run a program directly, without a shell, discarding its output.
    ///
    /// Each argument reaches the program as one argv entry.
    pub async fn run_program(&self, program: &str, args: &[&str]) -> io::Result<i32> {
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(exit_code(status))
    }

        /// Start a command without waiting for it.
    ///
    /// A detached task reaps the child and records its exit code.
    pub fn spawn(&self, command: &str) -> io::Result<()> {
        let mut child = self.logged(command)?.spawn()?;
        let pid = child.id();
        info!(command, pid = ?pid, "Background command started");

        let command = command.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    debug!(command = %command, code = exit_code(status), "Background command finished")
                }
                Err(e) => warn!(command = %command, error = %e, "Failed to reap background command"),
            }
        });
        Ok(())
    }

    fn logged(&self, command: &str) -> io::Result<Command> {
        let stdout = self.console.open_append()?;
        let stderr = stdout.try_clone()?;
        let mut cmd = self.shell_command(command);
        cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
        Ok(cmd)
    }

    fn shell_command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command).stdin(Stdio::null());
        cmd
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
