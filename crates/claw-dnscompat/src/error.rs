//! Error types for the compatibility harness.
//!
//! The variants follow how far a failure reaches:
//!
//! - **suite-fatal**: `ClusterProvisioning`, `Config`, `Interrupted`. Nothing
//!   else runs; the cluster is still deleted.
//! - **case-fatal**: `ResourceApply`, `ReadinessTimeout`, `ProcessInvocation`,
//!   `Assertion`, `ClusterQuery`, `InvalidVersion`, `Exec`. The case is marked
//!   failed, its fixture is still deleted, and the next case runs.
//! - **logged only**: `Cleanup`. Never escalated over the case's real result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use claw_exec::ExecError;
use thiserror::Error;

use crate::types::WorkloadRef;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, CompatError>;

/// Errors that can occur while driving the compatibility matrix.
#[derive(Debug, Error)]
pub enum CompatError {
    /// The cluster could not be created or seeded with images.
    #[error("cluster provisioning failed for '{cluster}': {reason}")]
    ClusterProvisioning {
        /// Cluster name.
        cluster: String,
        /// What went wrong, including captured tool output.
        reason: String,
    },

    /// The cluster API rejected a fixture.
    #[error("failed to apply '{}': {reason}", .path.display())]
    ResourceApply {
        /// Fixture path.
        path: PathBuf,
        /// Captured `kubectl` output.
        reason: String,
    },

    /// A workload did not become ready before its deadline.
    #[error("{workload} not ready after {} seconds: {last_status}", .timeout.as_secs())]
    ReadinessTimeout {
        /// The workload being waited on.
        workload: WorkloadRef,
        /// The deadline that elapsed.
        timeout: Duration,
        /// The last observed state.
        last_status: String,
    },

    /// A process could not be run as required.
    #[error("process invocation failed: {command}: {reason}")]
    ProcessInvocation {
        /// Command line.
        command: String,
        /// Launch error or exit status, with output.
        reason: String,
    },

    /// The observed outcome did not match the expected outcome.
    #[error("assertion failed for '{case}': expected {expected}, observed {observed}")]
    Assertion {
        /// Case description.
        case: String,
        /// Expected outcome.
        expected: String,
        /// Observed outcome.
        observed: String,
    },

    /// A fixture could not be deleted.
    #[error("cleanup of '{}' failed: {reason}", .path.display())]
    Cleanup {
        /// Fixture path.
        path: PathBuf,
        /// Captured `kubectl` output.
        reason: String,
    },

    /// A cluster query returned something that could not be interpreted.
    #[error("cluster query failed: {what}: {reason}")]
    ClusterQuery {
        /// What was being queried.
        what: String,
        /// Why the answer was unusable.
        reason: String,
    },

    /// A DNS service version string is not a valid image tag.
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion {
        /// The rejected version.
        version: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The suite was stopped before it finished.
    #[error("suite interrupted: {0}")]
    Interrupted(String),

    /// Process execution error.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl CompatError {
    /// Creates a `ClusterProvisioning` error.
    #[must_use]
    pub fn cluster_provisioning(cluster: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ClusterProvisioning {
            cluster: cluster.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ResourceApply` error.
    #[must_use]
    pub fn resource_apply(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::ResourceApply {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Creates a `ReadinessTimeout` error.
    #[must_use]
    pub fn readiness_timeout(
        workload: &WorkloadRef,
        timeout: Duration,
        last_status: impl Into<String>,
    ) -> Self {
        Self::ReadinessTimeout {
            workload: workload.clone(),
            timeout,
            last_status: last_status.into(),
        }
    }

    /// Creates a `ProcessInvocation` error.
    #[must_use]
    pub fn process_invocation(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessInvocation {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Assertion` error.
    #[must_use]
    pub fn assertion(
        case: impl Into<String>,
        expected: impl ToString,
        observed: impl ToString,
    ) -> Self {
        Self::Assertion {
            case: case.into(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }

    /// Creates a `Cleanup` error.
    #[must_use]
    pub fn cleanup(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::Cleanup {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Creates a `ClusterQuery` error.
    #[must_use]
    pub fn cluster_query(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ClusterQuery {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidVersion` error.
    #[must_use]
    pub fn invalid_version(version: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an `Interrupted` error.
    #[must_use]
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self::Interrupted(reason.into())
    }

    /// Returns `true` if the whole suite must stop.
    #[must_use]
    pub fn is_fatal_to_suite(&self) -> bool {
        matches!(
            self,
            Self::ClusterProvisioning { .. } | Self::Config(_) | Self::Interrupted(_)
        )
    }

    /// Returns `true` if this error fails the current case only.
    #[must_use]
    pub fn is_case_failure(&self) -> bool {
        !self.is_fatal_to_suite() && !matches!(self, Self::Cleanup { .. })
    }

    /// Short, stable name of the error kind for reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClusterProvisioning { .. } => "ClusterProvisioningError",
            Self::ResourceApply { .. } => "ResourceApplyError",
            Self::ReadinessTimeout { .. } => "ReadinessTimeoutError",
            Self::ProcessInvocation { .. } | Self::Exec(_) => "ProcessInvocationError",
            Self::Assertion { .. } => "AssertionFailure",
            Self::Cleanup { .. } => "CleanupError",
            Self::ClusterQuery { .. } => "ClusterQueryError",
            Self::InvalidVersion { .. } => "InvalidVersionError",
            Self::Config(_) => "ConfigError",
            Self::Interrupted(_) => "Interrupted",
        }
    }
}
