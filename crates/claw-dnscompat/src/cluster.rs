//! Ephemeral cluster lifecycle.
//!
//! [`ClusterLifecycleManager`] provisions a single-node k3s cluster through
//! `k3d`, preloads the images every case needs, and deletes the cluster at
//! the end of the suite. Provisioning failures are fatal and never retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use claw_exec::{CommandRunner, CommandSpec, Outcome};
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::error::{CompatError, Result};

/// Reference to a provisioned cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    name: String,
    kubeconfig: PathBuf,
}

impl ClusterHandle {
    /// Cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the kubeconfig written for this cluster.
    #[must_use]
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }
}

#[derive(Debug)]
enum Lifecycle {
    Idle,
    /// `start` was called; the handle is present once creation succeeded.
    Attempted(Option<ClusterHandle>),
    Stopped,
}

/// Owns the cluster from creation to deletion.
#[derive(Debug)]
pub struct ClusterLifecycleManager<R> {
    runner: Arc<R>,
    config: ClusterConfig,
    state: Lifecycle,
}

impl<R: CommandRunner> ClusterLifecycleManager<R> {
    /// Create a manager; nothing is provisioned until [`Self::start`].
    #[must_use]
    pub fn new(runner: Arc<R>, config: ClusterConfig) -> Self {
        Self {
            runner,
            config,
            state: Lifecycle::Idle,
        }
    }

    /// Cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The handle of a successfully started cluster.
    #[must_use]
    pub fn handle(&self) -> Option<&ClusterHandle> {
        match &self.state {
            Lifecycle::Attempted(handle) => handle.as_ref(),
            Lifecycle::Idle | Lifecycle::Stopped => None,
        }
    }

    /// Create the cluster and import `required_images` into it.
    ///
    /// # Errors
    ///
    /// Any failure is `ClusterProvisioning`. The cluster may exist partially;
    /// [`Self::stop`] still removes it.
    pub async fn start(&mut self, required_images: &[String]) -> Result<ClusterHandle> {
        if !matches!(self.state, Lifecycle::Idle) {
            return Err(self.provisioning("cluster lifecycle already started"));
        }
        self.state = Lifecycle::Attempted(None);

        info!(cluster = %self.config.name, "creating cluster");
        self.create().await?;

        let kubeconfig = self.write_kubeconfig().await?;
        info!(cluster = %self.config.name, kubeconfig = %kubeconfig.display(), "cluster created");

        for image in required_images {
            self.preload(image).await?;
        }

        let handle = ClusterHandle {
            name: self.config.name.clone(),
            kubeconfig,
        };
        self.state = Lifecycle::Attempted(Some(handle.clone()));
        Ok(handle)
    }

    /// Delete the cluster.
    ///
    /// Runs the deletion only on the first call after a `start` attempt,
    /// successful or not. Later calls, and calls without a prior `start`,
    /// do nothing.
    ///
    /// # Errors
    ///
    /// Returns `ClusterProvisioning` if the runtime refuses the deletion.
    pub async fn stop(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, Lifecycle::Stopped) {
            Lifecycle::Attempted(_) => {}
            Lifecycle::Idle => {
                self.state = Lifecycle::Idle;
                debug!(cluster = %self.config.name, "stop without start, nothing to delete");
                return Ok(());
            }
            Lifecycle::Stopped => return Ok(()),
        }

        info!(cluster = %self.config.name, "deleting cluster");
        let spec = self
            .k3d(["cluster", "delete", self.config.name.as_str()])
            .timeout(Duration::from_secs(self.config.delete_timeout_secs));
        let outcome = self.invoke(&spec).await?;
        self.check(&spec, outcome)?;
        info!(cluster = %self.config.name, "cluster deleted");
        Ok(())
    }

    async fn create(&self) -> Result<()> {
        let mut spec = self
            .k3d(["cluster", "create", self.config.name.as_str(), "--wait"])
            .arg("--timeout")
            .arg(format!("{}s", self.config.create_timeout_secs))
            .timeout(Duration::from_secs(self.config.create_timeout_secs + 30));
        if let Some(image) = &self.config.k3s_image {
            spec = spec.arg("--image").arg(image);
        }
        for arg in &self.config.k3s_args {
            spec = spec.arg("--k3s-arg").arg(arg);
        }

        let outcome = self.invoke(&spec).await?;
        self.check(&spec, outcome).map(|_| ())
    }

    async fn write_kubeconfig(&self) -> Result<PathBuf> {
        let spec = self
            .k3d(["kubeconfig", "write", self.config.name.as_str()])
            .timeout(Duration::from_secs(60));
        let outcome = self.invoke(&spec).await?;
        let output = self.check(&spec, outcome)?;

        output
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| self.provisioning("k3d did not report a kubeconfig path"))
    }

    async fn preload(&self, image: &str) -> Result<()> {
        let timeout = Duration::from_secs(self.config.image_timeout_secs);

        let inspect = CommandSpec::new(&self.config.docker_binary)
            .args(["image", "inspect", image])
            .timeout(timeout);
        let present = self.invoke(&inspect).await?.is_success();
        if present {
            debug!(image, "image present locally");
        } else {
            info!(image, "pulling image");
            let pull = CommandSpec::new(&self.config.docker_binary)
                .args(["pull", image])
                .timeout(timeout);
            let outcome = self.invoke(&pull).await?;
            self.check(&pull, outcome)?;
        }

        let import = self
            .k3d(["image", "import", image, "-c", self.config.name.as_str()])
            .timeout(timeout);
        let outcome = self.invoke(&import).await?;
        self.check(&import, outcome)?;
        debug!(image, cluster = %self.config.name, "image imported");
        Ok(())
    }

    fn k3d<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> CommandSpec {
        CommandSpec::new(&self.config.k3d_binary).args(args)
    }

    async fn invoke(&self, spec: &CommandSpec) -> Result<Outcome> {
        self.runner
            .run(spec)
            .await
            .map_err(|e| self.provisioning(format!("{}: {e}", spec.description())))
    }

    fn check(&self, spec: &CommandSpec, outcome: Outcome) -> Result<String> {
        match outcome.exit_error {
            None => Ok(outcome.output),
            Some(exit) => {
                warn!(command = %spec.description(), output = %outcome.output, "cluster runtime command failed");
                Err(self.provisioning(format!(
                    "{} ({exit}): {}",
                    spec.description(),
                    outcome.output.trim()
                )))
            }
        }
    }

    fn provisioning(&self, reason: impl Into<String>) -> CompatError {
        CompatError::cluster_provisioning(&self.config.name, reason)
    }
}
