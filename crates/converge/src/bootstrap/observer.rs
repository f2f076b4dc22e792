//! Progress reporting for the bootstrap workflow.

use tracing::{debug, error, info, warn};

use super::state::Stage;
use crate::error::Error;

/// Receives progress events from a bootstrap run.
///
/// Every method has an empty default so implementations only pick the events
/// they care about.
pub trait BootstrapObserver: Send + Sync {
    /// A stage is about to run.
    fn stage_entered(&self, _package: &str, _stage: &Stage) {}

    /// The package could not be found in `catalog`.
    fn probe_missed(&self, _package: &str, _catalog: &str, _cause: &Error) {}

    /// A stage failed and the run is over.
    fn failed(&self, _package: &str, _stage: &str, _cause: &Error) {}

    /// The operator deployment did not show up and the catalog cache is
    /// about to be evicted.
    fn recovery_started(&self, _package: &str, _cause: &Error) {}

    /// The operator deployment exists.
    fn installed(&self, _package: &str, _deployment: &str) {}
}

/// Reports progress through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl BootstrapObserver for TracingObserver {
    fn stage_entered(&self, package: &str, stage: &Stage) {
        match stage {
            Stage::Resolved(r) => info!(
                package,
                catalog = %r.catalog,
                channel = ?r.channel,
                using_fallback = r.state.using_fallback,
                "package resolved"
            ),
            Stage::Skipped(reason) => warn!(package, %reason, "skipping operator bootstrap"),
            other => debug!(package, stage = %other, "entering stage"),
        }
    }

    fn probe_missed(&self, package: &str, catalog: &str, cause: &Error) {
        info!(package, catalog, %cause, "package not found in catalog");
    }

    fn failed(&self, package: &str, stage: &str, cause: &Error) {
        error!(package, stage, %cause, "operator bootstrap failed");
    }

    fn recovery_started(&self, package: &str, cause: &Error) {
        warn!(
            package,
            %cause,
            "operator deployment missing, evicting OLM catalog cache and retrying"
        );
    }

    fn installed(&self, package: &str, deployment: &str) {
        info!(package, deployment, "operator deployment created");
    }
}
