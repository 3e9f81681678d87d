//! Local runner
//!
//! Spawns processes on the current host with `tokio::process` and waits for
//! them with a bounded timeout.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandError, CommandResult, CommandRunner, RunnerResult};

/// Default timeout for a single command, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runner that executes commands on the local host.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    /// Maximum time to wait for a single command
    timeout_secs: u64,
}

impl LocalRunner {
    /// Create a runner with the default timeout.
    pub fn new() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set the per-command timeout in seconds. Zero is treated as one second.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs.max(1);
        self
    }

    /// Configured timeout in seconds.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn build_command(program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out child must not outlive the run.
            .kill_on_drop(true);
        cmd
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, argv: &[String]) -> RunnerResult<CommandResult> {
        let (program, args) = argv.split_first().ok_or(CommandError::EmptyCommand)?;
        debug!(command = %argv.join(" "), "Executing local command");

        let child = Self::build_command(program, args)
            .spawn()
            .map_err(|e| CommandError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;

        let timeout = Duration::from_secs(self.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| CommandError::Wait {
                program: program.clone(),
                message: e.to_string(),
            })?,
            Err(_) => return Err(CommandError::Timeout(self.timeout_secs)),
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::argv;

    #[tokio::test]
    async fn test_local_run() {
        let runner = LocalRunner::new();
        let result = runner.run(&argv(["echo", "hello world"])).await.unwrap();

        assert!(result.success);
        assert!(result.stdout.contains("hello world"));
    }

    #[tokio::test]
    async fn test_local_nonzero_exit_is_not_an_error() {
        let runner = LocalRunner::new();
        let result = runner.run(&argv(["sh", "-c", "echo oops >&2; exit 42"])).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 42);
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_local_missing_program() {
        let runner = LocalRunner::new();
        let result = runner.run(&argv(["hardshell-no-such-binary"])).await;

        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_local_empty_command() {
        let runner = LocalRunner::new();
        assert_eq!(runner.run(&[]).await, Err(CommandError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_local_timeout() {
        let runner = LocalRunner::new().with_timeout(1);
        let result = runner.run(&argv(["sleep", "10"])).await;

        assert_eq!(result, Err(CommandError::Timeout(1)));
    }
}
