//! Core data model: test cases, matrices and cluster object references.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CompatError, Result};

/// Whether the mesh CLI is expected to accept or reject a DNS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    /// The CLI exits with status zero.
    Success,
    /// The CLI exits non-zero (the version is rejected as unsafe).
    Failure,
}

impl ExpectedOutcome {
    /// Map "an exit error was observed" onto an outcome.
    #[must_use]
    pub fn from_exit_error(present: bool) -> Self {
        if present { Self::Failure } else { Self::Success }
    }
}

impl fmt::Display for ExpectedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Success => "success",
            Self::Failure => "failure",
        })
    }
}

/// One row of a compatibility matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Human-readable label, e.g. "CoreDNS 1.2.6".
    pub description: String,
    /// DNS service image tag to switch to.
    pub dependency_version: String,
    /// Fixture applied before and deleted after the case.
    pub fixture_set: PathBuf,
    /// What the CLI under test should do.
    pub expected_outcome: ExpectedOutcome,
}

impl TestCase {
    /// Build a case for `version` labelled "CoreDNS <version>".
    #[must_use]
    pub fn coredns(
        version: impl Into<String>,
        fixture_set: impl Into<PathBuf>,
        expected_outcome: ExpectedOutcome,
    ) -> Self {
        let version = version.into();
        Self {
            description: format!("CoreDNS {version}"),
            dependency_version: version,
            fixture_set: fixture_set.into(),
            expected_outcome,
        }
    }
}

/// How a matrix judges its cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatrixMode {
    /// The CLI's `prepare` safety check must accept or reject each version
    /// exactly as the case expects.
    Safety,
    /// Every version must be accepted.
    Compatibility {
        /// Keep the CLI resident and resolve a mesh name through the tools pod.
        #[serde(default)]
        verify_resolution: bool,
    },
}

impl fmt::Display for MatrixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safety => write!(f, "safety"),
            Self::Compatibility {
                verify_resolution: false,
            } => write!(f, "compatibility"),
            Self::Compatibility {
                verify_resolution: true,
            } => write!(f, "compatibility+resolution"),
        }
    }
}

/// An ordered list of cases run under one mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    /// Matrix name, used for selection on the command line.
    pub name: String,
    /// Judging mode.
    pub mode: MatrixMode,
    /// Cases, run strictly in order.
    pub cases: Vec<TestCase>,
}

impl Matrix {
    /// Check the matrix is runnable.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for an empty name or case list, a blank
    /// version, or a compatibility case that expects failure.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CompatError::config("matrix name cannot be empty"));
        }
        if self.cases.is_empty() {
            return Err(CompatError::config(format!(
                "matrix '{}' has no cases",
                self.name
            )));
        }
        for case in &self.cases {
            if case.dependency_version.trim().is_empty() {
                return Err(CompatError::config(format!(
                    "matrix '{}': case '{}' has no version",
                    self.name, case.description
                )));
            }
            if case.fixture_set.as_os_str().is_empty() {
                return Err(CompatError::config(format!(
                    "matrix '{}': case '{}' has no fixture set",
                    self.name, case.description
                )));
            }
            if matches!(self.mode, MatrixMode::Compatibility { .. })
                && case.expected_outcome == ExpectedOutcome::Failure
            {
                return Err(CompatError::config(format!(
                    "matrix '{}': compatibility case '{}' cannot expect failure",
                    self.name, case.description
                )));
            }
        }
        Ok(())
    }
}

/// A namespaced Deployment, by name. Lookup key only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    /// Namespace.
    pub namespace: String,
    /// Deployment name.
    pub name: String,
}

impl WorkloadRef {
    /// Create a reference.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A concrete pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRef {
    /// Namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
}

impl PodRef {
    /// Create a reference.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The cluster DNS service, the one piece of mutable cluster-wide state the
/// matrix changes between cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsDeployment {
    /// The Deployment running the DNS service.
    pub workload: WorkloadRef,
    /// Container whose image is swapped.
    pub container: String,
    /// Image repository; the version is used as the tag.
    pub image_repository: String,
}

impl DnsDeployment {
    /// Full image reference for `version`.
    #[must_use]
    pub fn image_for(&self, version: &str) -> String {
        format!("{}:{version}", self.image_repository)
    }
}

impl Default for DnsDeployment {
    fn default() -> Self {
        Self {
            workload: WorkloadRef::new("kube-system", "coredns"),
            container: "coredns".to_string(),
            image_repository: "coredns/coredns".to_string(),
        }
    }
}

/// A file-addressed set of resource definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    /// Display name.
    pub name: String,
    /// File or directory passed to `kubectl -f`.
    pub path: PathBuf,
}

impl Fixture {
    /// Create a fixture named after the last component of `path`.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self { name, path }
    }

    /// Path on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
