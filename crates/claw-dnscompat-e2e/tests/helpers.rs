//! Test helpers for E2E tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use claw_dnscompat::{
    ExpectedOutcome, Matrix, MatrixMode, Suite, SuiteConfig, SuiteReport, TestCase,
    config::{COMPATIBILITY_FIXTURE, SAFETY_FIXTURE},
};
use claw_exec::{CommandRunner, CommandSpec, Outcome, ProcessHandle, ProcessRunner};
use parking_lot::Mutex;

/// Directory the relative fixture paths resolve against.
pub fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../claw-dnscompat")
}

/// Install a test-friendly subscriber; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claw_dnscompat=info,claw_exec=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Default configuration on a uniquely named cluster, with binary overrides
/// taken from the environment.
pub fn e2e_config() -> SuiteConfig {
    let mut config = SuiteConfig::default().with_fixture_root(&fixture_root());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    config.cluster.name = format!("dnscompat-e2e-{}", &suffix[..8]);

    if let Ok(binary) = std::env::var("MESH_BINARY") {
        config.mesh.binary = binary;
    }
    if let Ok(binary) = std::env::var("KUBECTL_BIN") {
        config.kubectl_binary = binary;
    }
    if let Ok(binary) = std::env::var("K3D_BIN") {
        config.cluster.k3d_binary = binary;
    }
    config
}

/// A one-case matrix.
pub fn single_case(mode: MatrixMode, version: &str, expected: ExpectedOutcome) -> Matrix {
    let fixture = match mode {
        MatrixMode::Safety => SAFETY_FIXTURE,
        MatrixMode::Compatibility { .. } => COMPATIBILITY_FIXTURE,
    };
    Matrix {
        name: format!("{mode}-{version}"),
        mode,
        cases: vec![TestCase::coredns(
            version,
            fixture_root().join(fixture),
            expected,
        )],
    }
}

/// Run `matrices` on a fresh cluster with the real process runner.
pub async fn run_suite(matrices: &[Matrix]) -> SuiteReport {
    init_tracing();
    Suite::new(Arc::new(ProcessRunner::new()), e2e_config())
        .run(matrices)
        .await
        .expect("suite setup should succeed")
}

/// A [`ProcessRunner`] that records every command line it is given.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    inner: ProcessRunner,
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> claw_exec::Result<Outcome> {
        self.calls.lock().push(spec.description());
        self.inner.run(spec).await
    }

    fn start(&self, spec: &CommandSpec) -> claw_exec::Result<ProcessHandle> {
        self.calls.lock().push(spec.description());
        self.inner.start(spec)
    }
}
