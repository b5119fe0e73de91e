//! Observed results of finished processes.

use std::fmt;
use std::process::ExitStatus;

/// Why a process did not exit cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitError {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, when the process was killed (Unix only).
    pub signal: Option<i32>,
}

impl ExitError {
    /// Convert an exit status into an error, or `None` if it succeeded.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Option<Self> {
        if status.success() {
            return None;
        }

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Some(Self {
            code: status.code(),
            signal,
        })
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit status {code}"),
            (None, Some(signal)) => write!(f, "terminated by signal {signal}"),
            (None, None) => write!(f, "terminated abnormally"),
        }
    }
}

impl std::error::Error for ExitError {}

/// The observed result of one process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Present when the process exited non-zero or was killed.
    pub exit_error: Option<ExitError>,
    /// Interleaved stdout and stderr, line by line.
    pub output: String,
}

impl Outcome {
    /// An outcome for a process that exited with status zero.
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_error: None,
            output: output.into(),
        }
    }

    /// An outcome for a process that exited with `code`.
    #[must_use]
    pub fn failure(code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_error: Some(ExitError {
                code: Some(code),
                signal: None,
            }),
            output: output.into(),
        }
    }

    /// Build an outcome from a raw exit status.
    #[must_use]
    pub fn from_status(status: ExitStatus, output: String) -> Self {
        Self {
            exit_error: ExitError::from_status(status),
            output,
        }
    }

    /// `true` when the process exited with status zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_error.is_none()
    }

    /// Trimmed output, convenient for single-value queries.
    #[must_use]
    pub fn trimmed(&self) -> &str {
        self.output.trim()
    }
}
