//! Name resolution from inside the cluster.

use std::net::IpAddr;

use claw_exec::CommandRunner;
use tracing::debug;

use crate::error::{CompatError, Result};
use crate::kubectl::Kubectl;
use crate::types::PodRef;

/// Runs `dig` in a pod and reports what it answered.
#[derive(Debug)]
pub struct DnsQueryVerifier<R> {
    kubectl: Kubectl<R>,
}

impl<R: CommandRunner> DnsQueryVerifier<R> {
    /// Create a verifier.
    #[must_use]
    pub fn new(kubectl: Kubectl<R>) -> Self {
        Self { kubectl }
    }

    /// Resolve `name` from `pod` and return the raw answer.
    ///
    /// An empty answer is not an error; interpreting it is up to the caller.
    ///
    /// # Errors
    ///
    /// Returns `ProcessInvocation` if the exec or the query tool fails.
    pub async fn resolve(&self, pod: &PodRef, name: &str) -> Result<String> {
        let args = [
            "exec",
            "-n",
            pod.namespace.as_str(),
            pod.name.as_str(),
            "--",
            "dig",
            name,
            "+short",
        ];
        let outcome = self.kubectl.run(&args).await?;
        if let Some(exit) = outcome.exit_error {
            return Err(CompatError::process_invocation(
                format!("dig {name} in {pod}"),
                format!("{exit}: {}", outcome.output.trim()),
            ));
        }
        debug!(pod = %pod, name, answer = %outcome.output.trim(), "dns query answered");
        Ok(outcome.output)
    }
}

/// Addresses in a `dig +short` answer, in order.
///
/// CNAME targets and diagnostic lines are skipped.
#[must_use]
pub fn parse_answers(raw: &str) -> Vec<IpAddr> {
    raw.lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}
