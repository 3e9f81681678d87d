//! External command execution.
//!
//! Every check that needs to ask the host something (loaded modules, kernel
//! parameters, package state, service state) goes through the
//! [`CommandRunner`] trait. Commands are argument vectors, never shell strings,
//! and a non-zero exit status is data, not an error: only failing to start the
//! process or running out of time produces a [`CommandError`].
//!
//! # Example
//!
//! ```rust,ignore
//! use hardshell::runner::{CommandRunner, LocalRunner};
//!
//! let runner = LocalRunner::new().with_timeout(10);
//! let result = runner.run(&["sysctl".into(), "-n".into(), "kernel.randomize_va_space".into()]).await?;
//! println!("{}", result.stdout.trim());
//! ```

/// Local process execution.
pub mod local;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalRunner;

/// Errors raised when a command could not produce a result at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The argument vector was empty.
    #[error("Empty command")]
    EmptyCommand,

    /// The program could not be started (not installed, not executable).
    #[error("Failed to spawn '{program}': {message}")]
    Spawn {
        /// Program name
        program: String,
        /// Error message
        message: String,
    },

    /// Waiting for the process failed.
    #[error("Failed to wait for '{program}': {message}")]
    Wait {
        /// Program name
        program: String,
        /// Error message
        message: String,
    },

    /// The process did not finish within the configured timeout.
    #[error("Command timed out after {0} seconds")]
    Timeout(u64),
}

/// Result type for command execution.
pub type RunnerResult<T> = Result<T, CommandError>;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if the process exited successfully.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: false,
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs external commands on the audited host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv[0]` with the remaining elements as arguments and capture
    /// its output.
    async fn run(&self, argv: &[String]) -> RunnerResult<CommandResult>;
}

/// Build an argument vector from string slices.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let result = CommandResult::failure(1, "out", "err");
        assert_eq!(result.combined_output(), "out\nerr");

        let result = CommandResult::success("", "only err");
        assert_eq!(result.combined_output(), "only err");
    }

    #[test]
    fn test_argv_builder() {
        assert_eq!(argv(["modprobe", "-r", "cramfs"]), vec!["modprobe", "-r", "cramfs"]);
    }
}
