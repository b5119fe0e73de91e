//! The per-case state machine.
//!
//! Each case walks
//!
//! ```text
//! FixtureApplied -> Ready -> VersionSet -> Invoked -> Asserted -> Cleaned
//! ```
//!
//! strictly in order. A failure at any step skips to `Cleaned`: the fixture is
//! deleted before the failure is recorded and the next case starts. One
//! failing case never aborts the matrix.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use claw_exec::{CommandRunner, ProcessHandle};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SuiteConfig;
use crate::dns::{DnsQueryVerifier, parse_answers};
use crate::error::{CompatError, Result};
use crate::fixture::FixtureApplier;
use crate::kubectl::Kubectl;
use crate::mesh::MeshCli;
use crate::readiness::{ReadinessWaiter, WaitPolicy};
use crate::types::{DnsDeployment, ExpectedOutcome, Matrix, MatrixMode, PodRef, TestCase, WorkloadRef};
use crate::version::VersionSwitcher;

/// Steps of a case, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    /// The case fixture was accepted by the cluster API.
    FixtureApplied,
    /// The DNS service was Ready on the fixture.
    Ready,
    /// The DNS service runs the case version.
    VersionSet,
    /// The CLI under test was launched.
    Invoked,
    /// The observed outcome matched the expectation.
    Asserted,
    /// The case fixture was deleted.
    Cleaned,
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FixtureApplied => "fixture-applied",
            Self::Ready => "ready",
            Self::VersionSet => "version-set",
            Self::Invoked => "invoked",
            Self::Asserted => "asserted",
            Self::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// Case verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Every step succeeded.
    Passed,
    /// A step failed.
    Failed,
}

/// What happened in one case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    /// Case description.
    pub description: String,
    /// DNS service version.
    pub version: String,
    /// Case fixture.
    pub fixture: PathBuf,
    /// Expected CLI outcome.
    pub expected: ExpectedOutcome,
    /// Observed CLI outcome, once the CLI ran.
    pub observed: Option<ExpectedOutcome>,
    /// Steps reached, in order.
    pub reached: Vec<CaseState>,
    /// Verdict.
    pub verdict: Verdict,
    /// Failure message.
    pub failure: Option<String>,
    /// Failure kind, e.g. `ReadinessTimeoutError`.
    pub failure_kind: Option<String>,
    /// Fixture deletion failure; logged, never changes the verdict.
    pub cleanup_error: Option<String>,
    /// Combined output of the CLI under test.
    pub output: String,
    /// Addresses returned by the resolution check.
    pub answers: Vec<IpAddr>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CaseReport {
    /// Whether the case passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    /// Last step reached.
    #[must_use]
    pub fn last_state(&self) -> Option<CaseState> {
        self.reached.last().copied()
    }
}

/// Results of one matrix.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixReport {
    /// Matrix name.
    pub name: String,
    /// Judging mode.
    pub mode: MatrixMode,
    /// Case reports, in run order.
    pub cases: Vec<CaseReport>,
}

impl MatrixReport {
    /// Number of passed cases.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.passed()).count()
    }

    /// Number of failed cases.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }

    /// Whether every case passed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed() == 0
    }
}

/// Where the matrix finds things and how long it waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// The DNS service under test.
    pub dns: DnsDeployment,
    /// Workload whose pod runs the query tool.
    pub tools: WorkloadRef,
    /// Name resolved in resolution cases.
    pub resolution_query: String,
    /// Deadline for the resolution check.
    pub dns_query_timeout: Duration,
    /// Interval between resolution attempts.
    pub dns_retry_interval: Duration,
}

impl RunSettings {
    /// Settings taken from the suite configuration.
    #[must_use]
    pub fn from_config(config: &SuiteConfig) -> Self {
        Self {
            dns: config.dns.clone(),
            tools: config.tools.clone(),
            resolution_query: config.resolution_query(),
            dns_query_timeout: config.timing.dns_query_timeout(),
            dns_retry_interval: config.timing.dns_retry_interval(),
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    reached: Vec<CaseState>,
    observed: Option<ExpectedOutcome>,
    output: String,
    answers: Vec<IpAddr>,
}

impl Progress {
    fn reach(&mut self, state: CaseState, case: &TestCase) {
        debug!(case = %case.description, state = %state, "case advanced");
        self.reached.push(state);
    }
}

/// Runs matrices case by case against one cluster.
#[derive(Debug)]
pub struct MatrixRunner<R> {
    runner: Arc<R>,
    fixtures: FixtureApplier<R>,
    waiter: ReadinessWaiter<R>,
    switcher: VersionSwitcher<R>,
    verifier: DnsQueryVerifier<R>,
    mesh: MeshCli,
    settings: RunSettings,
    applied: Option<PathBuf>,
}

impl<R: CommandRunner> MatrixRunner<R> {
    /// Wire the components around one `kubectl` boundary.
    #[must_use]
    pub fn new(kubectl: &Kubectl<R>, policy: WaitPolicy, mesh: MeshCli, settings: RunSettings) -> Self {
        let waiter = ReadinessWaiter::new(kubectl.clone(), policy);
        Self {
            runner: Arc::clone(kubectl.runner()),
            fixtures: FixtureApplier::new(kubectl.clone()),
            switcher: VersionSwitcher::new(kubectl.clone(), waiter.clone()),
            verifier: DnsQueryVerifier::new(kubectl.clone()),
            waiter,
            mesh,
            settings,
            applied: None,
        }
    }

    /// The matrix fixture currently applied, if any.
    #[must_use]
    pub fn applied_fixture(&self) -> Option<&std::path::Path> {
        self.applied.as_deref()
    }

    /// Run every case of `matrix` in order.
    pub async fn run_matrix(&mut self, matrix: &Matrix) -> MatrixReport {
        info!(matrix = %matrix.name, mode = %matrix.mode, cases = matrix.cases.len(), "running matrix");

        let mut cases = Vec::with_capacity(matrix.cases.len());
        for case in &matrix.cases {
            cases.push(self.run_case(matrix.mode, case).await);
        }

        let report = MatrixReport {
            name: matrix.name.clone(),
            mode: matrix.mode,
            cases,
        };
        info!(
            matrix = %report.name,
            passed = report.passed(),
            failed = report.failed(),
            "matrix finished"
        );
        report
    }

    /// Run one case through every step, always ending with fixture deletion.
    pub async fn run_case(&mut self, mode: MatrixMode, case: &TestCase) -> CaseReport {
        let started = Instant::now();
        info!(case = %case.description, version = %case.dependency_version, expected = %case.expected_outcome, "case started");

        let mut progress = Progress::default();
        let result = match self.release_leftover().await {
            Ok(()) => self.execute(mode, case, &mut progress).await,
            Err(e) => Err(e),
        };

        let cleanup_error = self.fixtures.delete_best_effort(&case.fixture_set).await;
        if cleanup_error.is_none() {
            if self.applied.as_ref() == Some(&case.fixture_set) {
                self.applied = None;
            }
            progress.reach(CaseState::Cleaned, case);
        }

        let (verdict, failure, failure_kind) = match result {
            Ok(()) => {
                info!(case = %case.description, "case passed");
                (Verdict::Passed, None, None)
            }
            Err(e) => {
                warn!(case = %case.description, kind = e.kind(), error = %e, "case failed");
                (Verdict::Failed, Some(e.to_string()), Some(e.kind().to_string()))
            }
        };

        CaseReport {
            description: case.description.clone(),
            version: case.dependency_version.clone(),
            fixture: case.fixture_set.clone(),
            expected: case.expected_outcome,
            observed: progress.observed,
            reached: progress.reached,
            verdict,
            failure,
            failure_kind,
            cleanup_error: cleanup_error.map(|e| e.to_string()),
            output: progress.output,
            answers: progress.answers,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Delete a fixture left behind by a failed cleanup before applying another.
    async fn release_leftover(&mut self) -> Result<()> {
        if let Some(path) = self.applied.clone() {
            warn!(fixture = %path.display(), "previous case fixture still applied, retrying deletion");
            self.fixtures.delete(&path).await?;
            self.applied = None;
        }
        Ok(())
    }

    async fn execute(&mut self, mode: MatrixMode, case: &TestCase, progress: &mut Progress) -> Result<()> {
        let timeout = self.waiter.policy().timeout;

        self.applied = Some(case.fixture_set.clone());
        self.fixtures.apply(&case.fixture_set).await?;
        progress.reach(CaseState::FixtureApplied, case);

        self.waiter.wait_ready(&self.settings.dns.workload, timeout).await?;
        progress.reach(CaseState::Ready, case);

        self.switcher
            .set_version(&self.settings.dns, &case.dependency_version, timeout)
            .await?;
        progress.reach(CaseState::VersionSet, case);

        match mode {
            MatrixMode::Compatibility {
                verify_resolution: true,
            } => self.verify_resolution(case, progress).await?,
            MatrixMode::Safety
            | MatrixMode::Compatibility {
                verify_resolution: false,
            } => self.check_prepare(case, progress).await?,
        }

        progress.reach(CaseState::Asserted, case);
        Ok(())
    }

    async fn check_prepare(&self, case: &TestCase, progress: &mut Progress) -> Result<()> {
        let spec = self.mesh.prepare();
        let outcome = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| CompatError::process_invocation(spec.description(), e.to_string()))?;
        progress.reach(CaseState::Invoked, case);

        info!(case = %case.description, output = %outcome.output.trim_end(), "mesh prepare output");
        progress.output.clone_from(&outcome.output);

        let observed = ExpectedOutcome::from_exit_error(outcome.exit_error.is_some());
        progress.observed = Some(observed);
        if observed == case.expected_outcome {
            return Ok(());
        }

        let detail = outcome
            .exit_error
            .map_or_else(|| "exit status 0".to_string(), |e| e.to_string());
        Err(CompatError::assertion(
            &case.description,
            case.expected_outcome,
            format!("{observed} ({detail})"),
        ))
    }

    async fn verify_resolution(&self, case: &TestCase, progress: &mut Progress) -> Result<()> {
        let spec = self.mesh.controller();
        let mut handle = self
            .runner
            .start(&spec)
            .map_err(|e| CompatError::process_invocation(spec.description(), e.to_string()))?;
        progress.reach(CaseState::Invoked, case);
        info!(case = %case.description, pid = ?handle.id(), "mesh controller started");

        let query = self.query_while_running(&mut handle).await;

        let stopped = handle
            .stop()
            .await
            .map_err(|e| CompatError::process_invocation(spec.description(), e.to_string()))?;
        info!(case = %case.description, output = %stopped.outcome.output.trim_end(), "mesh controller output");
        progress.output.clone_from(&stopped.outcome.output);

        if let (true, Some(exit)) = (stopped.exited_on_its_own, stopped.outcome.exit_error) {
            progress.observed = Some(ExpectedOutcome::Failure);
            return Err(CompatError::assertion(
                &case.description,
                case.expected_outcome,
                format!("failure (controller exited with {exit})"),
            ));
        }
        progress.observed = Some(ExpectedOutcome::Success);

        let answers = query?;
        if answers.is_empty() {
            return Err(CompatError::assertion(
                &case.description,
                format!("an address for {}", self.settings.resolution_query),
                "no answer",
            ));
        }
        info!(case = %case.description, name = %self.settings.resolution_query, answers = ?answers, "name resolved");
        progress.answers = answers;
        Ok(())
    }

    /// Query until an address appears, the deadline passes, or the
    /// controller exits.
    async fn query_while_running(&self, handle: &mut ProcessHandle) -> Result<Vec<IpAddr>> {
        let pod: PodRef = self.waiter.first_ready_pod(&self.settings.tools).await?;
        let name = &self.settings.resolution_query;
        let deadline = Instant::now() + self.settings.dns_query_timeout;

        loop {
            let last = match self.verifier.resolve(&pod, name).await {
                Ok(raw) => {
                    let answers = parse_answers(&raw);
                    if !answers.is_empty() {
                        return Ok(answers);
                    }
                    debug!(name = %name, "no answer yet");
                    Ok(Vec::new())
                }
                Err(e) => {
                    debug!(name = %name, error = %e, "query failed, retrying");
                    Err(e)
                }
            };

            if handle.has_exited()? {
                warn!(command = %handle.description(), "mesh controller exited during resolution check");
                return last;
            }
            let now = Instant::now();
            if now >= deadline {
                return last;
            }
            tokio::time::sleep(self.settings.dns_retry_interval.min(deadline - now)).await;
        }
    }
}
