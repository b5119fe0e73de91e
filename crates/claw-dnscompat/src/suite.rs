//! Suite setup, matrices and guaranteed teardown.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use claw_exec::CommandRunner;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cluster::ClusterLifecycleManager;
use crate::config::SuiteConfig;
use crate::error::{CompatError, Result};
use crate::fixture::FixtureApplier;
use crate::kubectl::Kubectl;
use crate::matrix::{MatrixReport, MatrixRunner, RunSettings};
use crate::mesh::MeshCli;
use crate::readiness::{ReadinessWaiter, WaitPolicy};
use crate::types::{Fixture, Matrix};

/// Results of a whole suite run.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Cluster name.
    pub cluster: String,
    /// When setup began.
    pub started_at: DateTime<Utc>,
    /// When teardown finished.
    pub finished_at: DateTime<Utc>,
    /// Matrix reports, in run order.
    pub matrices: Vec<MatrixReport>,
    /// Cluster deletion failure, if any.
    pub teardown_error: Option<String>,
}

impl SuiteReport {
    /// Passed cases across all matrices.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.matrices.iter().map(MatrixReport::passed).sum()
    }

    /// Failed cases across all matrices.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.matrices.iter().map(MatrixReport::failed).sum()
    }

    /// Whether every case passed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.matrices.iter().all(MatrixReport::success)
    }
}

/// Runs matrices on a cluster it creates and always deletes.
#[derive(Debug)]
pub struct Suite<R> {
    runner: Arc<R>,
    config: SuiteConfig,
    policy: WaitPolicy,
    settings: RunSettings,
}

impl<R: CommandRunner> Suite<R> {
    /// Create a suite from configuration.
    #[must_use]
    pub fn new(runner: Arc<R>, config: SuiteConfig) -> Self {
        let policy = WaitPolicy::from(&config.timing);
        let settings = RunSettings::from_config(&config);
        Self {
            runner,
            config,
            policy,
            settings,
        }
    }

    /// Override the readiness policy.
    #[must_use]
    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the per-case settings.
    #[must_use]
    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start the cluster, seed it, run `matrices` in order, delete the cluster.
    ///
    /// Equivalent to [`Suite::run_until`] with a shutdown signal that never fires.
    ///
    /// # Errors
    ///
    /// See [`Suite::run_until`].
    pub async fn run(&self, matrices: &[Matrix]) -> Result<SuiteReport> {
        self.run_until(matrices, std::future::pending()).await
    }

    /// Like [`Suite::run`], but stops early when `shutdown` completes.
    ///
    /// The cluster is deleted on every path, including a failed start and an
    /// interruption. Dropping the returned future skips teardown, so cancel
    /// through `shutdown` instead.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for an invalid matrix (before anything is
    /// provisioned), `ClusterProvisioning` if the cluster cannot be started,
    /// the seed step's error, or `Interrupted` when `shutdown` fires first.
    /// Case failures are reported, not returned.
    pub async fn run_until<F>(&self, matrices: &[Matrix], shutdown: F) -> Result<SuiteReport>
    where
        F: Future<Output = ()>,
    {
        for matrix in matrices {
            matrix.validate()?;
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, cluster = %self.config.cluster.name, matrices = matrices.len(), "suite started");

        let mut cluster = ClusterLifecycleManager::new(Arc::clone(&self.runner), self.config.cluster.clone());
        let result = tokio::select! {
            result = self.run_on_cluster(&mut cluster, matrices) => result,
            () = shutdown => {
                warn!(%run_id, "suite interrupted, tearing down cluster");
                Err(CompatError::interrupted("shutdown requested before the matrices finished"))
            }
        };

        let teardown_error = match cluster.stop().await {
            Ok(()) => None,
            Err(e) => {
                error!(%run_id, error = %e, "cluster teardown failed");
                Some(e.to_string())
            }
        };

        let matrices = result.inspect_err(|e| {
            error!(%run_id, kind = e.kind(), error = %e, "suite aborted");
        })?;

        let report = SuiteReport {
            run_id,
            cluster: self.config.cluster.name.clone(),
            started_at,
            finished_at: Utc::now(),
            matrices,
            teardown_error,
        };
        info!(
            %run_id,
            passed = report.passed(),
            failed = report.failed(),
            "suite finished"
        );
        Ok(report)
    }

    async fn run_on_cluster(
        &self,
        cluster: &mut ClusterLifecycleManager<R>,
        matrices: &[Matrix],
    ) -> Result<Vec<MatrixReport>> {
        let handle = cluster.start(&self.config.required_images).await?;

        let kubectl = Kubectl::new(Arc::clone(&self.runner), &self.config.kubectl_binary)
            .with_kubeconfig(handle.kubeconfig())
            .with_timeout(self.config.timing.kubectl_timeout());
        self.seed(&kubectl).await?;

        let mesh = MeshCli::new(
            self.config.mesh.clone(),
            handle.kubeconfig(),
            self.config.timing.cli_timeout(),
        );
        let mut runner = MatrixRunner::new(&kubectl, self.policy, mesh, self.settings.clone());

        let mut reports = Vec::with_capacity(matrices.len());
        for matrix in matrices {
            reports.push(runner.run_matrix(matrix).await);
        }
        Ok(reports)
    }

    async fn seed(&self, kubectl: &Kubectl<R>) -> Result<()> {
        let applier = FixtureApplier::new(kubectl.clone());
        for path in &self.config.seed_fixtures {
            let fixture = Fixture::from_path(path);
            info!(fixture = %fixture.name, "applying seed fixture");
            applier.apply(fixture.path()).await?;
        }

        let waiter = ReadinessWaiter::new(kubectl.clone(), self.policy);
        for workload in &self.config.seed_workloads {
            waiter.wait_ready(workload, self.policy.timeout).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCluster;
    use crate::types::{ExpectedOutcome, MatrixMode, TestCase};
    use std::time::Duration;

    fn suite(fake: &Arc<FakeCluster>) -> Suite<FakeCluster> {
        let config = SuiteConfig::default();
        let settings = RunSettings {
            dns_query_timeout: Duration::from_millis(300),
            dns_retry_interval: Duration::from_millis(10),
            ..RunSettings::from_config(&config)
        };
        Suite::new(Arc::clone(fake), config)
            .with_wait_policy(WaitPolicy {
                interval: Duration::from_millis(10),
                timeout: Duration::from_millis(500),
            })
            .with_settings(settings)
    }

    #[tokio::test]
    async fn test_full_suite_passes_and_tears_down() {
        let fake = Arc::new(FakeCluster::new());
        let suite = suite(&fake);

        let report = suite
            .run(&SuiteConfig::default().matrices)
            .await
            .expect("suite should run");

        assert!(report.success(), "{report:#?}");
        assert_eq!(report.passed(), 8);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.cluster, "maesh-integration");
        assert!(report.finished_at >= report.started_at);
        assert!(report.teardown_error.is_none());

        assert!(!fake.cluster_exists());
        assert_eq!(fake.count_calls("k3d cluster delete"), 1);
        assert_eq!(fake.imported_images().len(), 8);
        // Seed fixtures stay for the suite; matrix fixtures are gone.
        assert_eq!(fake.applied().len(), 3);
    }

    #[tokio::test]
    async fn test_seed_order_precedes_cases() {
        let fake = Arc::new(FakeCluster::new());
        suite(&fake)
            .run(&SuiteConfig::default().matrices[..1])
            .await
            .expect("suite should run");

        let calls = fake.calls();
        let position = |prefix: &str| calls.iter().position(|c| c.starts_with(prefix));
        let crds = position("kubectl apply -f testdata/smi/crds/").expect("crds applied");
        let first_case = position("kubectl apply -f testdata/coredns/").expect("case applied");
        let created = position("k3d cluster create").expect("cluster created");
        let deleted = position("k3d cluster delete").expect("cluster deleted");
        assert!(created < crds);
        assert!(crds < first_case);
        assert_eq!(deleted, calls.len() - 1);
    }

    #[tokio::test]
    async fn test_failed_start_runs_no_cases_and_still_tears_down() {
        let fake = Arc::new(FakeCluster::new());
        fake.fail_cluster_create();

        let err = suite(&fake)
            .run(&SuiteConfig::default().matrices)
            .await
            .expect_err("should fail");

        assert!(matches!(err, CompatError::ClusterProvisioning { .. }));
        assert_eq!(fake.count_calls("k3d cluster delete maesh-integration"), 1);
        assert_eq!(fake.count_calls("kubectl"), 0);
        assert_eq!(fake.count_calls("maesh"), 0);
    }

    #[tokio::test]
    async fn test_seed_failure_is_fatal_and_tears_down() {
        let fake = Arc::new(FakeCluster::new());
        fake.fail_apply("testdata/smi/crds/");

        let err = suite(&fake)
            .run(&SuiteConfig::default().matrices)
            .await
            .expect_err("should fail");

        assert!(matches!(err, CompatError::ResourceApply { .. }));
        assert_eq!(fake.count_calls("k3d cluster delete"), 1);
        assert_eq!(fake.count_calls("maesh"), 0);
    }

    #[tokio::test]
    async fn test_interrupt_during_seed_tears_down_once() {
        let fake = Arc::new(FakeCluster::new());
        fake.delay_readiness("whoami/whoami", u32::MAX);
        let suite = suite(&fake).with_wait_policy(WaitPolicy {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(30),
        });

        let err = suite
            .run_until(
                &SuiteConfig::default().matrices,
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await
            .expect_err("should be interrupted");

        assert!(matches!(err, CompatError::Interrupted(_)));
        assert!(!fake.cluster_exists());
        assert_eq!(fake.count_calls("k3d cluster delete maesh-integration"), 1);
        assert_eq!(fake.count_calls("maesh"), 0);
    }

    #[tokio::test]
    async fn test_interrupt_mid_case_tears_down_once() {
        let fake = Arc::new(FakeCluster::new());
        fake.delay_readiness("kube-system/coredns", u32::MAX);
        let suite = suite(&fake).with_wait_policy(WaitPolicy {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(30),
        });

        let err = suite
            .run_until(
                &SuiteConfig::default().matrices,
                tokio::time::sleep(Duration::from_millis(150)),
            )
            .await
            .expect_err("should be interrupted");

        assert!(matches!(err, CompatError::Interrupted(_)));
        assert!(fake.count_calls("kubectl apply -f testdata/coredns/") >= 1);
        assert!(!fake.cluster_exists());
        assert_eq!(fake.count_calls("k3d cluster delete"), 1);
    }

    #[tokio::test]
    async fn test_wait_policy_timeout_bounds_seed_readiness() {
        let fake = Arc::new(FakeCluster::new());
        fake.delay_readiness("whoami/whoami", u32::MAX);
        let timeout = Duration::from_millis(150);
        let suite = suite(&fake).with_wait_policy(WaitPolicy {
            interval: Duration::from_millis(10),
            timeout,
        });

        let err = suite
            .run(&SuiteConfig::default().matrices)
            .await
            .expect_err("seed should time out");

        match err {
            CompatError::ReadinessTimeout { timeout: waited, .. } => assert_eq!(waited, timeout),
            other => unreachable!("unexpected error: {other}"),
        }
        assert_eq!(fake.count_calls("k3d cluster delete"), 1);
    }

    #[tokio::test]
    async fn test_invalid_matrix_provisions_nothing() {
        let fake = Arc::new(FakeCluster::new());
        let bad = Matrix {
            name: "compatibility".to_string(),
            mode: MatrixMode::Compatibility { verify_resolution: false },
            cases: vec![TestCase::coredns("1.2.6", "coredns.yaml", ExpectedOutcome::Failure)],
        };

        let err = suite(&fake).run(&[bad]).await.expect_err("should fail");

        assert!(matches!(err, CompatError::Config(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_case_failures_are_reported_not_returned() {
        let fake = Arc::new(FakeCluster::new());
        fake.accept_all_versions();

        let report = suite(&fake)
            .run(&SuiteConfig::default().matrices)
            .await
            .expect("suite should run");

        assert!(!report.success());
        assert_eq!(report.failed(), 1);
        assert_eq!(fake.count_calls("k3d cluster delete"), 1);

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["matrices"][0]["cases"][0]["verdict"], "failed");
        assert_eq!(json["matrices"][0]["cases"][0]["failure_kind"], "AssertionFailure");
    }
}
