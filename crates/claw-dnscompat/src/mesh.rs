//! Command lines for the mesh CLI under test.
//!
//! The CLI runs with the parent environment plus `KUBECONFIG`, in one of two
//! modes: `prepare`, whose exit status is the safety verdict, and resident
//! controller mode, kept running while name resolution is checked.

use std::path::{Path, PathBuf};
use std::time::Duration;

use claw_exec::CommandSpec;

use crate::config::MeshConfig;

/// Builds mesh CLI invocations against one cluster.
#[derive(Debug, Clone)]
pub struct MeshCli {
    config: MeshConfig,
    kubeconfig: PathBuf,
    timeout: Duration,
}

impl MeshCli {
    /// Create a builder for the cluster behind `kubeconfig`.
    #[must_use]
    pub fn new(config: MeshConfig, kubeconfig: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            config,
            kubeconfig: kubeconfig.into(),
            timeout,
        }
    }

    /// Kubeconfig passed to the CLI.
    #[must_use]
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    /// `maesh prepare ...`, bounded by the CLI timeout.
    #[must_use]
    pub fn prepare(&self) -> CommandSpec {
        self.base()
            .arg("prepare")
            .args(self.common_args())
            .args(self.config.extra_prepare_args.iter().cloned())
            .timeout(self.timeout)
    }

    /// The resident controller; unbounded, stopped by the caller.
    #[must_use]
    pub fn controller(&self) -> CommandSpec {
        self.base()
            .args(self.common_args())
            .args(self.config.extra_controller_args.iter().cloned())
    }

    fn base(&self) -> CommandSpec {
        CommandSpec::new(&self.config.binary)
            .env("KUBECONFIG", self.kubeconfig.to_string_lossy().into_owned())
    }

    fn common_args(&self) -> [String; 8] {
        [
            "--kubeconfig".to_string(),
            self.kubeconfig.to_string_lossy().into_owned(),
            "--namespace".to_string(),
            self.config.namespace.clone(),
            "--clusterdomain".to_string(),
            self.config.cluster_domain.clone(),
            "--loglevel".to_string(),
            self.config.log_level.clone(),
        ]
    }
}
