//! Error types for hardshell.
//!
//! Errors here are the ones that can stop a run before it starts: loading the
//! rule document, validating the rule tree, reading configuration. Everything
//! that happens while checks are evaluated is turned into a
//! [`CheckStatus::Error`](crate::status::CheckStatus::Error) outcome instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::runner::{CommandError, CommandResult};

/// Result type alias for hardshell operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for hardshell.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Rule Errors
    // ========================================================================
    /// The rule document could not be parsed.
    #[error("Failed to parse rules '{path}': {message}")]
    RuleParse {
        /// Path to the rule document
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// A rule is structurally invalid (missing field, wrong type).
    #[error("Invalid rule '{rule}': {message}")]
    RuleValidation {
        /// Dotted path of the offending rule, e.g. `kernel.filesystem.squashfs`
        rule: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No rule document was found in any of the searched locations.
    #[error("No rules file found (searched: {0})")]
    RulesNotFound(String),

    // ========================================================================
    // Host Errors
    // ========================================================================
    /// The host's OS could not be identified.
    #[error("Unable to detect operating system: {0}")]
    OsDetection(String),

    /// An external command could not be run.
    #[error("Command '{command}' failed: {source}")]
    Command {
        /// Program name
        command: String,
        /// Underlying runner error
        #[source]
        source: CommandError,
    },

    /// An external command ran but reported failure.
    #[error("Command '{command}' exited with {exit_code}: {stderr}")]
    CommandStatus {
        /// Full command line
        command: String,
        /// Exit code
        exit_code: i32,
        /// Trimmed standard error
        stderr: String,
    },

    // ========================================================================
    // Reconciliation Errors
    // ========================================================================
    /// The desired setting line is not a single `key=value` pair.
    #[error("Malformed setting '{0}': expected exactly one '='")]
    MalformedSetting(String),

    /// The reconciliation directory does not exist or is not a directory.
    #[error("Settings directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// File operation failed on a specific path.
    #[error("I/O error on '{path}': {source}")]
    FileIo {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a rule validation error.
    pub fn rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RuleValidation {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Attach a path to an I/O error.
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Error for a command that completed unsuccessfully.
    pub fn command_status(command: impl Into<String>, result: &CommandResult) -> Self {
        Error::CommandStatus {
            command: command.into(),
            exit_code: result.exit_code,
            stderr: result.stderr.trim().to_string(),
        }
    }

    /// Returns true if the underlying cause is a permission problem.
    ///
    /// Hardening without root is the common way remediation fails, so the
    /// handlers use this to phrase their log messages.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::FileIo { source, .. } | Error::Io(source) => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            Error::CommandStatus { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                stderr.contains("permission denied") || stderr.contains("operation not permitted")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_error_display() {
        let err = Error::rule("kernel.filesystem.squashfs", "missing 'module_name'");
        assert_eq!(
            err.to_string(),
            "Invalid rule 'kernel.filesystem.squashfs': missing 'module_name'"
        );
    }

    #[test]
    fn test_permission_denied_detection() {
        let err = Error::file_io(
            "/etc/sysctl.d/60-hardshell.conf",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.is_permission_denied());

        let err = Error::MalformedSetting("a=b=c".into());
        assert!(!err.is_permission_denied());
    }
}
