//! In-place DNS service version switching.

use std::time::Duration;

use claw_exec::CommandRunner;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::error::{CompatError, Result};
use crate::kubectl::Kubectl;
use crate::readiness::{ImageExpectation, ReadinessWaiter};
use crate::types::DnsDeployment;

/// Docker image tag grammar.
static TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap_or_else(|_| unreachable!()));

/// Check that `version` is a valid image tag.
///
/// # Errors
///
/// Returns `InvalidVersion` otherwise.
pub fn validate_version(version: &str) -> Result<()> {
    if TAG_REGEX.is_match(version) {
        Ok(())
    } else {
        Err(CompatError::invalid_version(
            version,
            "not a valid image tag (letters, digits, '_', '.', '-'; at most 128 characters)",
        ))
    }
}

/// Tag part of an image reference, if it has one.
#[must_use]
pub fn image_tag(image: &str) -> Option<&str> {
    let name = image.rsplit('/').next().unwrap_or(image);
    name.rsplit_once(':').map(|(_, tag)| tag)
}

/// Swaps the DNS service image and waits for the rollout.
#[derive(Debug)]
pub struct VersionSwitcher<R> {
    kubectl: Kubectl<R>,
    waiter: ReadinessWaiter<R>,
}

impl<R: CommandRunner> VersionSwitcher<R> {
    /// Create a switcher.
    #[must_use]
    pub fn new(kubectl: Kubectl<R>, waiter: ReadinessWaiter<R>) -> Self {
        Self { kubectl, waiter }
    }

    /// Set the DNS service to `version` and wait until every replica runs it.
    ///
    /// An unknown tag never becomes Ready and ends in `ReadinessTimeout`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidVersion` for a malformed tag, `ClusterQuery` if the
    /// image cannot be set, or `ReadinessTimeout`.
    pub async fn set_version(&self, dns: &DnsDeployment, version: &str, timeout: Duration) -> Result<()> {
        validate_version(version)?;

        let image = dns.image_for(version);
        let target = format!("deployment/{}", dns.workload.name);
        let assignment = format!("{}={image}", dns.container);

        let outcome = self
            .kubectl
            .run(&["set", "image", &target, &assignment, "-n", &dns.workload.namespace])
            .await?;
        if let Some(exit) = outcome.exit_error {
            return Err(CompatError::cluster_query(
                format!("set image on {}", dns.workload),
                format!("{exit}: {}", outcome.output.trim()),
            ));
        }
        info!(workload = %dns.workload, image = %image, "dns image updated, waiting for rollout");

        let expected = ImageExpectation {
            container: dns.container.clone(),
            image,
        };
        self.waiter.wait_rollout(&dns.workload, &expected, timeout).await?;
        info!(workload = %dns.workload, version, "dns version active");
        Ok(())
    }

    /// Tag the Deployment template currently specifies for the DNS container.
    ///
    /// # Errors
    ///
    /// Returns `ClusterQuery` if the Deployment or container is missing.
    pub async fn current_version(&self, dns: &DnsDeployment) -> Result<String> {
        let deployment = self.waiter.deployment(&dns.workload).await?;
        deployment
            .spec
            .template
            .spec
            .containers
            .iter()
            .find(|c| c.name == dns.container)
            .and_then(|c| image_tag(&c.image))
            .map(String::from)
            .ok_or_else(|| {
                CompatError::cluster_query(
                    format!("deployment {}", dns.workload),
                    format!("no tagged image for container '{}'", dns.container),
                )
            })
    }
}
