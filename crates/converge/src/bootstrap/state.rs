//! Stages of catalog resolution.

use std::fmt;

/// Where a package was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// The catalog serving the package.
    pub catalog: String,
    /// The channel to subscribe to, `None` for the package default.
    pub channel: Option<String>,
    /// Bookkeeping of the run that produced this resolution.
    pub state: BootstrapState,
}

/// Bookkeeping of one bootstrap run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapState {
    /// The catalog currently used to discover the package.
    pub discovery_source: String,
    /// Whether the fallback catalog had to be provisioned.
    pub using_fallback: bool,
    /// Whether the one-shot cache eviction has been spent.
    pub attempted_cache_eviction: bool,
}

impl BootstrapState {
    pub(crate) fn new(default_catalog: &str) -> Self {
        BootstrapState {
            discovery_source: default_catalog.to_string(),
            using_fallback: false,
            attempted_cache_eviction: false,
        }
    }
}

/// A stage of catalog resolution.
///
/// ```text
/// ProbingDefault ──found──────────────────────────────────────────────▶ Resolved
///       │ missing, fallback image set
///       ▼
/// ProvisioningFallback ──▶ AwaitingFallbackReady ──▶ ProbingFallback ──▶ Resolved
///       ▲ missing, no fallback image: Skipped
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Looking the package up in the default catalog.
    ProbingDefault,
    /// Creating the fallback catalog from the index image.
    ProvisioningFallback,
    /// Waiting for the fallback catalog to serve.
    AwaitingFallbackReady,
    /// Looking the package up in the fallback catalog.
    ProbingFallback,
    /// The package was found.
    Resolved(Resolution),
    /// The package is unavailable and there is no fallback.
    Skipped(String),
}

impl Stage {
    /// The stage name, without payload.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::ProbingDefault => "ProbingDefault",
            Stage::ProvisioningFallback => "ProvisioningFallback",
            Stage::AwaitingFallbackReady => "AwaitingFallbackReady",
            Stage::ProbingFallback => "ProbingFallback",
            Stage::Resolved(_) => "Resolved",
            Stage::Skipped(_) => "Skipped",
        }
    }

    /// Whether the run ends in this stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Resolved(_) | Stage::Skipped(_))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Resolved(r) => write!(f, "Resolved({})", r.catalog),
            Stage::Skipped(reason) => write!(f, "Skipped({})", reason),
            other => f.write_str(other.name()),
        }
    }
}
