//! Declarative fixture application.

use std::path::Path;

use claw_exec::CommandRunner;
use tracing::{info, warn};

use crate::error::{CompatError, Result};
use crate::kubectl::Kubectl;

/// Applies and deletes resource files through the cluster API.
///
/// Both operations are idempotent: re-applying converges, deleting something
/// already gone succeeds.
#[derive(Debug)]
pub struct FixtureApplier<R> {
    kubectl: Kubectl<R>,
}

impl<R> Clone for FixtureApplier<R> {
    fn clone(&self) -> Self {
        Self {
            kubectl: self.kubectl.clone(),
        }
    }
}

impl<R: CommandRunner> FixtureApplier<R> {
    /// Create an applier.
    #[must_use]
    pub fn new(kubectl: Kubectl<R>) -> Self {
        Self { kubectl }
    }

    /// `kubectl apply -f <path>`.
    ///
    /// # Errors
    ///
    /// Returns `ResourceApply` if the API rejects any object or `kubectl`
    /// cannot be run.
    pub async fn apply(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy();
        let outcome = self
            .kubectl
            .run(&["apply", "-f", &*target])
            .await
            .map_err(|e| CompatError::resource_apply(path, e.to_string()))?;

        if let Some(exit) = outcome.exit_error {
            return Err(CompatError::resource_apply(
                path,
                format!("{exit}: {}", outcome.output.trim()),
            ));
        }
        info!(fixture = %path.display(), "fixture applied");
        Ok(())
    }

    /// `kubectl delete -f <path> --ignore-not-found=true`.
    ///
    /// # Errors
    ///
    /// Returns `Cleanup` if the deletion fails.
    pub async fn delete(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy();
        let outcome = self
            .kubectl
            .run(&["delete", "-f", &*target, "--ignore-not-found=true"])
            .await
            .map_err(|e| CompatError::cleanup(path, e.to_string()))?;

        if let Some(exit) = outcome.exit_error {
            return Err(CompatError::cleanup(
                path,
                format!("{exit}: {}", outcome.output.trim()),
            ));
        }
        info!(fixture = %path.display(), "fixture deleted");
        Ok(())
    }

    /// [`Self::delete`], logging instead of returning a failure.
    ///
    /// Returns the error so callers can attach it to a report.
    pub async fn delete_best_effort(&self, path: &Path) -> Option<CompatError> {
        match self.delete(path).await {
            Ok(()) => None,
            Err(e) => {
                warn!(fixture = %path.display(), error = %e, "fixture cleanup failed");
                Some(e)
            }
        }
    }
}
