//! DNS service compatibility matrix harness.
//!
//! Provisions an ephemeral k3s cluster, seeds it with the mesh CRDs and test
//! workloads, then for every CoreDNS version in a matrix swaps the running DNS
//! image, invokes the mesh CLI and checks that it accepts or rejects the
//! version as expected. Resolution matrices additionally keep the CLI resident
//! and resolve a mesh name from inside the cluster.
//!
//! # Components
//!
//! - [`ClusterLifecycleManager`]: create, preload images, delete
//! - [`FixtureApplier`]: `kubectl apply`/`delete` by file path
//! - [`ReadinessWaiter`]: poll a workload until every pod is Ready
//! - [`VersionSwitcher`]: swap the DNS image and wait for the rollout
//! - [`DnsQueryVerifier`]: `dig` from inside a pod
//! - [`MatrixRunner`]: the per-case state machine
//! - [`Suite`]: setup, matrices, guaranteed teardown
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use claw_dnscompat::{Suite, SuiteConfig};
//! use claw_exec::ProcessRunner;
//!
//! # async fn example() -> claw_dnscompat::Result<()> {
//! let config = SuiteConfig::default();
//! let matrices = config.matrices.clone();
//! let report = Suite::new(Arc::new(ProcessRunner::new()), config)
//!     .run(&matrices)
//!     .await?;
//! assert!(report.success());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod config;
pub mod dns;
pub mod error;
pub mod fixture;
pub mod kubectl;
pub mod matrix;
pub mod mesh;
pub mod readiness;
pub mod suite;
pub mod types;
pub mod version;

#[cfg(test)]
mod fake;

pub use cluster::{ClusterHandle, ClusterLifecycleManager};
pub use config::{ClusterConfig, MeshConfig, SuiteConfig, TimingConfig, default_matrices};
pub use dns::{DnsQueryVerifier, parse_answers};
pub use error::{CompatError, Result};
pub use fixture::FixtureApplier;
pub use kubectl::Kubectl;
pub use matrix::{CaseReport, CaseState, MatrixReport, MatrixRunner, RunSettings, Verdict};
pub use mesh::MeshCli;
pub use readiness::{ImageExpectation, PodStatus, Readiness, ReadinessWaiter, WaitPolicy, evaluate};
pub use suite::{Suite, SuiteReport};
pub use types::{DnsDeployment, ExpectedOutcome, Fixture, Matrix, MatrixMode, PodRef, TestCase, WorkloadRef};
pub use version::{VersionSwitcher, validate_version};
