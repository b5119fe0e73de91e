//! Suite configuration.
//!
//! Everything the suite needs to know about its environment lives here as
//! data: which images to preload, which fixtures to apply, where the DNS
//! service and tools pod live, how the mesh CLI is invoked, how long to wait,
//! and the matrices themselves. Every field has a default matching the
//! CoreDNS compatibility suite, so an empty JSON object is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CompatError, Result};
use crate::types::{DnsDeployment, ExpectedOutcome, Matrix, MatrixMode, TestCase, WorkloadRef};
use crate::version::validate_version;

/// Fixture used by the safety matrix.
pub const SAFETY_FIXTURE: &str = "testdata/coredns/corednssafe.yaml";

/// Fixture used by the compatibility and resolution matrices.
pub const COMPATIBILITY_FIXTURE: &str = "testdata/coredns/coredns.yaml";

/// Cluster runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster name.
    pub name: String,
    /// `k3d` binary.
    pub k3d_binary: String,
    /// `docker` binary, used to pull images before import.
    pub docker_binary: String,
    /// Optional k3s node image override.
    pub k3s_image: Option<String>,
    /// Extra `--k3s-arg` values.
    pub k3s_args: Vec<String>,
    /// Deadline for cluster creation, in seconds.
    pub create_timeout_secs: u64,
    /// Deadline for pulling and importing one image, in seconds.
    pub image_timeout_secs: u64,
    /// Deadline for cluster deletion, in seconds.
    pub delete_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "maesh-integration".to_string(),
            k3d_binary: "k3d".to_string(),
            docker_binary: "docker".to_string(),
            k3s_image: None,
            k3s_args: Vec::new(),
            create_timeout_secs: 300,
            image_timeout_secs: 600,
            delete_timeout_secs: 120,
        }
    }
}

/// How the mesh CLI under test is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MeshConfig {
    /// Mesh binary.
    pub binary: String,
    /// Namespace the mesh is installed in.
    pub namespace: String,
    /// Kubernetes cluster domain.
    pub cluster_domain: String,
    /// DNS domain the mesh intercepts, e.g. `maesh`.
    pub mesh_domain: String,
    /// `--loglevel` value.
    pub log_level: String,
    /// Extra arguments appended in `prepare` mode.
    pub extra_prepare_args: Vec<String>,
    /// Extra arguments appended in resident mode.
    pub extra_controller_args: Vec<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            binary: "maesh".to_string(),
            namespace: "maesh".to_string(),
            cluster_domain: "cluster.local".to_string(),
            mesh_domain: "maesh".to_string(),
            log_level: "debug".to_string(),
            extra_prepare_args: Vec::new(),
            extra_controller_args: Vec::new(),
        }
    }
}

/// Polling and deadline settings, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    /// Interval between readiness polls.
    pub poll_interval_secs: u64,
    /// Deadline for a workload to become ready.
    pub readiness_timeout_secs: u64,
    /// Deadline for one `kubectl` call.
    pub kubectl_timeout_secs: u64,
    /// Deadline for the CLI under test in `prepare` mode.
    pub cli_timeout_secs: u64,
    /// Deadline for the resolution check to return an address.
    pub dns_query_timeout_secs: u64,
    /// Interval between resolution attempts.
    pub dns_retry_interval_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            readiness_timeout_secs: 180,
            kubectl_timeout_secs: 60,
            cli_timeout_secs: 120,
            dns_query_timeout_secs: 60,
            dns_retry_interval_secs: 2,
        }
    }
}

impl TimingConfig {
    /// Readiness poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Readiness deadline.
    #[must_use]
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Per-call `kubectl` deadline.
    #[must_use]
    pub fn kubectl_timeout(&self) -> Duration {
        Duration::from_secs(self.kubectl_timeout_secs)
    }

    /// CLI-under-test deadline.
    #[must_use]
    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs)
    }

    /// Resolution deadline.
    #[must_use]
    pub fn dns_query_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_query_timeout_secs)
    }

    /// Resolution retry interval.
    #[must_use]
    pub fn dns_retry_interval(&self) -> Duration {
        Duration::from_secs(self.dns_retry_interval_secs)
    }
}

/// Main suite configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SuiteConfig {
    /// Cluster runtime settings.
    pub cluster: ClusterConfig,
    /// `kubectl` binary.
    pub kubectl_binary: String,
    /// Images preloaded into the cluster before any case runs.
    pub required_images: Vec<String>,
    /// Fixtures applied once at suite setup, in order.
    pub seed_fixtures: Vec<PathBuf>,
    /// Workloads that must be ready before the first case.
    pub seed_workloads: Vec<WorkloadRef>,
    /// The DNS service under test.
    pub dns: DnsDeployment,
    /// Workload whose pod runs the DNS query tool.
    pub tools: WorkloadRef,
    /// Service resolved through the mesh domain in resolution cases.
    pub resolution_target: WorkloadRef,
    /// Mesh CLI settings.
    pub mesh: MeshConfig,
    /// Timing settings.
    pub timing: TimingConfig,
    /// Matrices, run in order.
    pub matrices: Vec<Matrix>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            kubectl_binary: "kubectl".to_string(),
            required_images: [
                "containous/whoami:v1.0.1",
                "coredns/coredns:1.2.6",
                "coredns/coredns:1.3.1",
                "coredns/coredns:1.4.0",
                "coredns/coredns:1.5.2",
                "coredns/coredns:1.6.3",
                "coredns/coredns:1.7.0",
                "giantswarm/tiny-tools:3.9",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            seed_fixtures: vec![
                PathBuf::from("testdata/whoami/whoami.yaml"),
                PathBuf::from("testdata/tools/tiny-tools.yaml"),
                PathBuf::from("testdata/smi/crds/"),
            ],
            seed_workloads: vec![
                WorkloadRef::new("whoami", "whoami"),
                WorkloadRef::new("maesh", "tiny-tools"),
            ],
            dns: DnsDeployment::default(),
            tools: WorkloadRef::new("maesh", "tiny-tools"),
            resolution_target: WorkloadRef::new("whoami", "whoami"),
            mesh: MeshConfig::default(),
            timing: TimingConfig::default(),
            matrices: default_matrices(),
        }
    }
}

/// The CoreDNS compatibility matrices.
///
/// - `safety`: 1.2.6 must be rejected by `prepare`; 1.3.1 and 1.4.0 accepted
/// - `compatibility`: 1.5.2, 1.6.3 and 1.7.0 accepted
/// - `resolution`: 1.6.3 and 1.7.0 resolve a mesh name with the CLI resident
#[must_use]
pub fn default_matrices() -> Vec<Matrix> {
    let safe = |v: &str, expected| TestCase::coredns(v, SAFETY_FIXTURE, expected);
    let compat = |v: &str| TestCase::coredns(v, COMPATIBILITY_FIXTURE, ExpectedOutcome::Success);

    vec![
        Matrix {
            name: "safety".to_string(),
            mode: MatrixMode::Safety,
            cases: vec![
                safe("1.2.6", ExpectedOutcome::Failure),
                safe("1.3.1", ExpectedOutcome::Success),
                safe("1.4.0", ExpectedOutcome::Success),
            ],
        },
        Matrix {
            name: "compatibility".to_string(),
            mode: MatrixMode::Compatibility {
                verify_resolution: false,
            },
            cases: vec![compat("1.5.2"), compat("1.6.3"), compat("1.7.0")],
        },
        Matrix {
            name: "resolution".to_string(),
            mode: MatrixMode::Compatibility {
                verify_resolution: true,
            },
            cases: vec![compat("1.6.3"), compat("1.7.0")],
        },
    ]
}

impl SuiteConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CompatError::config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or the config fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| CompatError::config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CompatError::config(format!("failed to serialize config: {e}")))
    }

    /// Rebase every relative fixture path onto `base`.
    #[must_use]
    pub fn with_fixture_root(mut self, base: &Path) -> Self {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.seed_fixtures.iter_mut().for_each(rebase);
        for matrix in &mut self.matrices {
            for case in &mut matrix.cases {
                rebase(&mut case.fixture_set);
            }
        }
        self
    }

    /// Select matrices by name, preserving configuration order.
    ///
    /// An empty selection selects every matrix.
    ///
    /// # Errors
    ///
    /// Returns an error if a requested name does not exist.
    pub fn select_matrices(&self, names: &[String]) -> Result<Vec<Matrix>> {
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.matrices.iter().any(|m| &m.name == *n))
        {
            return Err(CompatError::config(format!("unknown matrix '{unknown}'")));
        }

        Ok(self
            .matrices
            .iter()
            .filter(|m| names.is_empty() || names.contains(&m.name))
            .cloned()
            .collect())
    }

    /// Fully qualified name resolved in resolution cases,
    /// `<service>.<namespace>.<mesh-domain>`.
    #[must_use]
    pub fn resolution_query(&self) -> String {
        format!(
            "{}.{}.{}",
            self.resolution_target.name, self.resolution_target.namespace, self.mesh.mesh_domain
        )
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        let name = &self.cluster.name;
        if name.is_empty() {
            return Err(CompatError::config("cluster.name cannot be empty"));
        }
        if name.len() > 32 {
            return Err(CompatError::config("cluster.name cannot exceed 32 characters"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(CompatError::config(
                "cluster.name must contain only lowercase letters, digits, and hyphens",
            ));
        }

        for (field, value) in [
            ("cluster.k3d_binary", &self.cluster.k3d_binary),
            ("cluster.docker_binary", &self.cluster.docker_binary),
            ("kubectl_binary", &self.kubectl_binary),
            ("mesh.binary", &self.mesh.binary),
            ("mesh.namespace", &self.mesh.namespace),
            ("mesh.mesh_domain", &self.mesh.mesh_domain),
            ("dns.container", &self.dns.container),
            ("dns.image_repository", &self.dns.image_repository),
        ] {
            if value.trim().is_empty() {
                return Err(CompatError::config(format!("{field} cannot be empty")));
            }
        }

        for workload in [&self.dns.workload, &self.tools, &self.resolution_target]
            .into_iter()
            .chain(&self.seed_workloads)
        {
            if workload.namespace.is_empty() || workload.name.is_empty() {
                return Err(CompatError::config(format!(
                    "workload reference '{workload}' is incomplete"
                )));
            }
        }

        if self.required_images.iter().any(|i| i.trim().is_empty()) {
            return Err(CompatError::config("required_images cannot contain empty entries"));
        }

        let t = &self.timing;
        for (field, value) in [
            ("timing.poll_interval_secs", t.poll_interval_secs),
            ("timing.readiness_timeout_secs", t.readiness_timeout_secs),
            ("timing.kubectl_timeout_secs", t.kubectl_timeout_secs),
            ("timing.cli_timeout_secs", t.cli_timeout_secs),
            ("timing.dns_query_timeout_secs", t.dns_query_timeout_secs),
            ("timing.dns_retry_interval_secs", t.dns_retry_interval_secs),
            ("cluster.create_timeout_secs", self.cluster.create_timeout_secs),
            ("cluster.image_timeout_secs", self.cluster.image_timeout_secs),
            ("cluster.delete_timeout_secs", self.cluster.delete_timeout_secs),
        ] {
            if value == 0 {
                return Err(CompatError::config(format!("{field} must be greater than 0")));
            }
        }
        if t.poll_interval_secs > t.readiness_timeout_secs {
            return Err(CompatError::config(
                "timing.poll_interval_secs cannot exceed timing.readiness_timeout_secs",
            ));
        }

        let mut names = std::collections::HashSet::new();
        for matrix in &self.matrices {
            matrix.validate()?;
            if !names.insert(matrix.name.as_str()) {
                return Err(CompatError::config(format!(
                    "duplicate matrix name '{}'",
                    matrix.name
                )));
            }
            for case in &matrix.cases {
                validate_version(&case.dependency_version)
                    .map_err(|e| CompatError::config(format!("matrix '{}': {e}", matrix.name)))?;
            }
        }

        Ok(())
    }
}
