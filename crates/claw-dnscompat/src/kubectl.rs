//! The cluster API boundary.
//!
//! Every component that reads or mutates cluster objects does so through
//! [`Kubectl`], which pins the binary, the kubeconfig and a per-call deadline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use claw_exec::{CommandRunner, CommandSpec, Outcome};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{CompatError, Result};

/// A `kubectl` invoker bound to one cluster.
#[derive(Debug)]
pub struct Kubectl<R> {
    runner: Arc<R>,
    binary: String,
    kubeconfig: Option<PathBuf>,
    timeout: Duration,
}

impl<R> Clone for Kubectl<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            binary: self.binary.clone(),
            kubeconfig: self.kubeconfig.clone(),
            timeout: self.timeout,
        }
    }
}

impl<R: CommandRunner> Kubectl<R> {
    /// Create an invoker using the ambient kubeconfig.
    #[must_use]
    pub fn new(runner: Arc<R>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            kubeconfig: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Target the cluster described by `path`.
    #[must_use]
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Bound each call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The underlying runner.
    #[must_use]
    pub fn runner(&self) -> &Arc<R> {
        &self.runner
    }

    /// The kubeconfig in use, if pinned.
    #[must_use]
    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }

    /// Build the command for `args`, prefixed with `--kubeconfig` when pinned.
    #[must_use]
    pub fn command(&self, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.binary).timeout(self.timeout);
        if let Some(path) = &self.kubeconfig {
            spec = spec
                .arg("--kubeconfig")
                .arg(path.to_string_lossy().into_owned());
        }
        spec.args(args.iter().copied())
    }

    /// Run `kubectl <args>` to completion.
    ///
    /// A non-zero exit is returned in the outcome; only launch failures and
    /// timeouts are errors.
    pub async fn run(&self, args: &[&str]) -> Result<Outcome> {
        let spec = self.command(args);
        let outcome = self.runner.run(&spec).await?;
        debug!(
            command = %spec.description(),
            success = outcome.is_success(),
            "kubectl finished"
        );
        Ok(outcome)
    }

    /// Run `kubectl <args>` and decode its standard output as JSON.
    ///
    /// `what` names the query in errors.
    pub async fn get_json<T: DeserializeOwned>(&self, what: &str, args: &[&str]) -> Result<T> {
        let outcome = self.run(args).await?;
        if let Some(exit) = &outcome.exit_error {
            return Err(CompatError::cluster_query(
                what,
                format!("{exit}: {}", outcome.trimmed()),
            ));
        }
        serde_json::from_str(&outcome.output)
            .map_err(|e| CompatError::cluster_query(what, format!("unparseable response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCluster;
    use serde::Deserialize;

    fn kubectl(fake: &Arc<FakeCluster>) -> Kubectl<FakeCluster> {
        Kubectl::new(Arc::clone(fake), "kubectl").with_kubeconfig("/tmp/kubeconfig")
    }

    #[test]
    fn test_command_prefixes_kubeconfig() {
        let fake = Arc::new(FakeCluster::new());
        let spec = kubectl(&fake)
            .with_timeout(Duration::from_secs(5))
            .command(&["get", "pods", "-n", "maesh"]);

        assert_eq!(
            spec.get_args(),
            ["--kubeconfig", "/tmp/kubeconfig", "get", "pods", "-n", "maesh"]
        );
        assert_eq!(spec.get_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_command_without_kubeconfig() {
        let fake = Arc::new(FakeCluster::new());
        let spec = Kubectl::new(fake, "kubectl").command(&["version"]);
        assert_eq!(spec.get_args(), ["version"]);
    }

    #[derive(Debug, Deserialize)]
    struct Named {
        metadata: Meta,
    }

    #[derive(Debug, Deserialize)]
    struct Meta {
        name: String,
    }

    #[tokio::test]
    async fn test_get_json_decodes() {
        let fake = Arc::new(FakeCluster::new());
        let deployment: Named = kubectl(&fake)
            .get_json(
                "deployment",
                &["get", "deployment", "coredns", "-n", "kube-system", "-o", "json"],
            )
            .await
            .expect("should decode");
        assert_eq!(deployment.metadata.name, "coredns");
    }

    #[tokio::test]
    async fn test_get_json_failure_is_cluster_query() {
        let fake = Arc::new(FakeCluster::new());
        let err = kubectl(&fake)
            .get_json::<Named>(
                "deployment",
                &["get", "deployment", "missing", "-n", "kube-system", "-o", "json"],
            )
            .await
            .expect_err("should fail");
        assert!(matches!(err, CompatError::ClusterQuery { .. }));
    }
}
