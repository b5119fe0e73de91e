//! Error types for process execution.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for process operations.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors that can occur while launching or supervising an external process.
///
/// A process that runs and exits non-zero is *not* an error at this layer;
/// that is reported through [`crate::Outcome::exit_error`].
#[derive(Debug, Error)]
pub enum ExecError {
    /// A program path or argument was rejected before launch.
    #[error("invalid {field}: {reason}")]
    InvalidArgument {
        /// Which part of the command was rejected.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The process could not be started at all.
    #[error("failed to launch '{command}': {source}")]
    Launch {
        /// The command that was being launched.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The process did not finish within its deadline and was killed.
    #[error("'{command}' did not finish within {} seconds", .timeout.as_secs())]
    Timeout {
        /// The command that timed out.
        command: String,
        /// The deadline that elapsed.
        timeout: Duration,
        /// Combined output captured before the kill.
        output: String,
    },

    /// I/O error while waiting on or signalling the process.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Creates an `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Launch` error.
    #[must_use]
    pub fn launch(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            command: command.into(),
            source,
        }
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout(command: impl Into<String>, timeout: Duration, output: impl Into<String>) -> Self {
        Self::Timeout {
            command: command.into(),
            timeout,
            output: output.into(),
        }
    }

    /// Returns `true` if the program was never started.
    #[must_use]
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. } | Self::Launch { .. })
    }

    /// Output captured before the failure, if any was collected.
    #[must_use]
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::Timeout { output, .. } => Some(output),
            _ => None,
        }
    }
}
