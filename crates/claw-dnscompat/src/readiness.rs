//! Workload readiness polling.
//!
//! Readiness is decided by [`evaluate`], a pure function over observed pod
//! states, so the rule "never ready while any pod is not Ready" is tested
//! without a cluster. [`ReadinessWaiter`] adds the polling loop around it.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use claw_exec::CommandRunner;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TimingConfig;
use crate::error::{CompatError, Result};
use crate::kubectl::Kubectl;
use crate::types::{PodRef, WorkloadRef};

/// Poll interval and deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Time between polls.
    pub interval: Duration,
    /// Deadline for readiness and rollouts.
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(180),
        }
    }
}

impl From<&TimingConfig> for WaitPolicy {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            interval: timing.poll_interval(),
            timeout: timing.readiness_timeout(),
        }
    }
}

/// A container that must run a specific image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageExpectation {
    /// Container name.
    pub container: String,
    /// Full image reference.
    pub image: String,
}

/// What the poller learned about one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatus {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// The `Ready` condition is `True`.
    pub ready: bool,
    /// The pod has a deletion timestamp.
    pub terminating: bool,
    /// Reported phase.
    pub phase: String,
    /// `(container, image)` pairs from the pod spec.
    pub images: Vec<(String, String)>,
}

impl PodStatus {
    /// Reference to this pod.
    #[must_use]
    pub fn pod_ref(&self) -> PodRef {
        PodRef::new(&self.namespace, &self.name)
    }

    fn runs(&self, expected: &ImageExpectation) -> bool {
        self.images
            .iter()
            .any(|(c, i)| c == &expected.container && i == &expected.image)
    }
}

/// Result of evaluating a set of pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The selector matched nothing.
    NoPods,
    /// Some pods are not yet usable.
    Waiting {
        /// Pods reporting Ready.
        ready: usize,
        /// All matched pods.
        total: usize,
        /// Pods terminating or running another image.
        stale: usize,
    },
    /// Every pod is Ready.
    Ready {
        /// Number of pods.
        pods: usize,
    },
}

impl Readiness {
    /// Whether the workload is usable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPods => write!(f, "no pods"),
            Self::Waiting { ready, total, stale } => {
                write!(f, "{ready}/{total} pods ready")?;
                if *stale > 0 {
                    write!(f, ", {stale} stale")?;
                }
                Ok(())
            }
            Self::Ready { pods } => write!(f, "{pods}/{pods} pods ready"),
        }
    }
}

/// Decide readiness from observed pods.
///
/// Ready requires at least one pod, and every pod Ready, not terminating, and
/// running the expected image when one is given.
#[must_use]
pub fn evaluate(pods: &[PodStatus], expected: Option<&ImageExpectation>) -> Readiness {
    if pods.is_empty() {
        return Readiness::NoPods;
    }

    let ready = pods.iter().filter(|p| p.ready).count();
    let stale = pods
        .iter()
        .filter(|p| p.terminating || expected.is_some_and(|e| !p.runs(e)))
        .count();

    if ready == pods.len() && stale == 0 {
        Readiness::Ready { pods: pods.len() }
    } else {
        Readiness::Waiting {
            ready,
            total: pods.len(),
            stale,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Deployment {
    pub(crate) spec: DeploymentSpec,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeploymentSpec {
    #[serde(default)]
    pub(crate) selector: LabelSelector,
    pub(crate) template: PodTemplate,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LabelSelector {
    #[serde(default)]
    pub(crate) match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PodTemplate {
    pub(crate) spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PodSpec {
    #[serde(default)]
    pub(crate) containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Container {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) image: String,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    deletion_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodState {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl From<Pod> for PodStatus {
    fn from(pod: Pod) -> Self {
        let ready = pod
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True");
        Self {
            name: pod.metadata.name,
            namespace: pod.metadata.namespace,
            ready,
            terminating: pod.metadata.deletion_timestamp.is_some(),
            phase: pod.status.phase,
            images: pod
                .spec
                .containers
                .into_iter()
                .map(|c| (c.name, c.image))
                .collect(),
        }
    }
}

/// Polls workloads until they are usable.
#[derive(Debug)]
pub struct ReadinessWaiter<R> {
    kubectl: Kubectl<R>,
    policy: WaitPolicy,
}

impl<R> Clone for ReadinessWaiter<R> {
    fn clone(&self) -> Self {
        Self {
            kubectl: self.kubectl.clone(),
            policy: self.policy,
        }
    }
}

impl<R: CommandRunner> ReadinessWaiter<R> {
    /// Create a waiter.
    #[must_use]
    pub fn new(kubectl: Kubectl<R>, policy: WaitPolicy) -> Self {
        Self { kubectl, policy }
    }

    /// The configured policy.
    #[must_use]
    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    /// The Deployment object behind `workload`.
    pub(crate) async fn deployment(&self, workload: &WorkloadRef) -> Result<Deployment> {
        self.kubectl
            .get_json(
                &format!("deployment {workload}"),
                &[
                    "get",
                    "deployment",
                    &workload.name,
                    "-n",
                    &workload.namespace,
                    "-o",
                    "json",
                ],
            )
            .await
    }

    /// Current pods of `workload`, found through its selector.
    ///
    /// # Errors
    ///
    /// Returns `ClusterQuery` if the Deployment is missing, has no selector,
    /// or a listing cannot be decoded.
    pub async fn pods(&self, workload: &WorkloadRef) -> Result<Vec<PodStatus>> {
        let deployment = self.deployment(workload).await?;
        let labels = &deployment.spec.selector.match_labels;
        if labels.is_empty() {
            return Err(CompatError::cluster_query(
                format!("deployment {workload}"),
                "selector has no matchLabels",
            ));
        }
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let list: PodList = self
            .kubectl
            .get_json(
                &format!("pods of {workload}"),
                &[
                    "get",
                    "pods",
                    "-n",
                    &workload.namespace,
                    "-l",
                    &selector,
                    "-o",
                    "json",
                ],
            )
            .await?;

        Ok(list.items.into_iter().map(PodStatus::from).collect())
    }

    /// Wait until every pod of `workload` is Ready.
    ///
    /// # Errors
    ///
    /// Returns `ReadinessTimeout` carrying the last observed state.
    pub async fn wait_ready(&self, workload: &WorkloadRef, timeout: Duration) -> Result<Vec<PodStatus>> {
        self.poll(workload, None, timeout).await
    }

    /// Wait until every pod of `workload` is Ready and runs `expected`.
    ///
    /// # Errors
    ///
    /// Returns `ReadinessTimeout` carrying the last observed state.
    pub async fn wait_rollout(
        &self,
        workload: &WorkloadRef,
        expected: &ImageExpectation,
        timeout: Duration,
    ) -> Result<Vec<PodStatus>> {
        self.poll(workload, Some(expected), timeout).await
    }

    /// A pod of `workload` that is Ready now.
    ///
    /// # Errors
    ///
    /// Returns `ClusterQuery` if none is.
    pub async fn first_ready_pod(&self, workload: &WorkloadRef) -> Result<PodRef> {
        self.pods(workload)
            .await?
            .iter()
            .find(|p| p.ready && !p.terminating)
            .map(PodStatus::pod_ref)
            .ok_or_else(|| CompatError::cluster_query(format!("pods of {workload}"), "no ready pod"))
    }

    async fn poll(
        &self,
        workload: &WorkloadRef,
        expected: Option<&ImageExpectation>,
        timeout: Duration,
    ) -> Result<Vec<PodStatus>> {
        let deadline = Instant::now() + timeout;
        let mut last_status = "not observed".to_string();

        loop {
            match self.pods(workload).await {
                Ok(pods) => {
                    let readiness = evaluate(&pods, expected);
                    if readiness.is_ready() {
                        info!(workload = %workload, status = %readiness, "workload ready");
                        return Ok(pods);
                    }
                    debug!(workload = %workload, status = %readiness, "workload not ready");
                    last_status = readiness.to_string();
                }
                Err(CompatError::Exec(e)) if e.is_launch_failure() => {
                    return Err(CompatError::Exec(e));
                }
                Err(e) => {
                    warn!(workload = %workload, error = %e, "readiness query failed, retrying");
                    last_status = e.to_string();
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CompatError::readiness_timeout(workload, timeout, last_status));
            }
            tokio::time::sleep(self.policy.interval.min(deadline - now)).await;
        }
    }
}
