//! Configuration for bootstrapping an operator.
//!
//! The presets ([`OperatorProfile::gpu`], [`OperatorProfile::network`] and
//! [`OperatorProfile::nfd`]) carry the names and timings the operators are
//! known to need. With the "cli" feature turned on, [`Opts`] reads overrides
//! from flags and environment variables and [`Opts::profile`] applies them.

use std::time::Duration;

#[cfg(feature = "cli")]
use structopt::StructOpt;

use crate::poll::PollSpec;
use crate::store::Selector;

/// Namespace of the default OpenShift catalogs.
pub const MARKETPLACE_NAMESPACE: &str = "openshift-marketplace";
/// Namespace of the OLM catalog and olm operators.
pub const OLM_NAMESPACE: &str = "openshift-operator-lifecycle-manager";
/// Appended to the default catalog name to name the fallback catalog.
pub const FALLBACK_CATALOG_SUFFIX: &str = "-custom";

const MINUTE: u64 = 60;

fn every(interval_secs: u64, timeout_secs: u64) -> PollSpec {
    PollSpec::new(
        Duration::from_secs(interval_secs),
        Duration::from_secs(timeout_secs),
    )
}

/// How the default catalog is searched for the package.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeMode {
    /// A single lookup.
    Once,
    /// Repeated lookups until found or timed out.
    Poll(PollSpec),
}

/// Delays and poll bounds of the bootstrap workflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timings {
    /// How the package is looked up in the default catalog.
    pub default_probe: ProbeMode,
    /// Grace period after creating the fallback catalog.
    pub catalog_creation_delay: Duration,
    /// Wait for the fallback catalog to report `READY`.
    pub catalog_ready: PollSpec,
    /// Wait for the package to show up in the fallback catalog.
    pub package_manifest: PollSpec,
    /// Grace period after creating the subscription.
    pub deployment_creation_delay: Duration,
    /// Wait for the operator deployment to exist.
    pub deployment_created: PollSpec,
    /// Wait for the operator deployment to be ready.
    pub deployment_ready: PollSpec,
    /// Wait for the installed CSV to succeed.
    pub csv_succeeded: PollSpec,
    /// Wait for the operator's policy resource to be ready.
    pub policy_ready: PollSpec,
    /// Grace period after moving the subscription to another channel.
    pub csv_upgrade_delay: Duration,
    /// Wait for the policy resource to go away on teardown.
    pub instance_deleted: PollSpec,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            default_probe: ProbeMode::Once,
            catalog_creation_delay: Duration::from_secs(30),
            catalog_ready: every(10, 4 * MINUTE),
            package_manifest: every(30, 5 * MINUTE),
            deployment_creation_delay: Duration::from_secs(2 * MINUTE),
            deployment_created: every(30, 4 * MINUTE),
            deployment_ready: every(30, 4 * MINUTE),
            csv_succeeded: every(60, 15 * MINUTE),
            policy_ready: every(60, 12 * MINUTE),
            csv_upgrade_delay: Duration::from_secs(2 * MINUTE),
            instance_deleted: every(30, 5 * MINUTE),
        }
    }
}

/// Pods to delete to flush OLM's catalog cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEviction {
    /// Namespace the OLM pods run in.
    pub namespace: String,
    /// One delete-collection call is made per selector, in order.
    pub selectors: Vec<Selector>,
}

impl Default for CacheEviction {
    fn default() -> Self {
        CacheEviction {
            namespace: OLM_NAMESPACE.to_string(),
            selectors: vec![
                Selector::new().label("app", "catalog-operator"),
                Selector::new().label("app", "olm-operator"),
            ],
        }
    }
}

/// Everything needed to install one operator package through OLM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorProfile {
    /// The OLM package name.
    pub package: String,
    /// Namespace of the catalogs and package manifests.
    pub catalog_namespace: String,
    /// The catalog searched first.
    pub default_catalog: String,
    /// Index image for the fallback catalog. Without one a package missing
    /// from the default catalog skips the bootstrap.
    pub fallback_index_image: Option<String>,
    /// Name of the fallback catalog, `<default_catalog>-custom` when unset.
    pub fallback_catalog: Option<String>,
    /// Console display name of the fallback catalog.
    pub fallback_display_name: String,
    /// Console publisher of the fallback catalog.
    pub fallback_publisher: String,
    /// Namespace the operator is installed to.
    pub operator_namespace: String,
    /// Name of the OperatorGroup created in that namespace.
    pub operator_group: String,
    /// Name of the Subscription.
    pub subscription: String,
    /// Name of the operator Deployment OLM creates.
    pub deployment: String,
    /// Channel override, the package's default channel when unset.
    pub channel: Option<String>,
    /// `Automatic` or `Manual`.
    pub install_plan_approval: String,
    /// Prefix of the package's ClusterServiceVersion names.
    pub csv_prefix: String,
    /// Pods to delete when the deployment fails to show up.
    pub cache_eviction: CacheEviction,
    /// Delays and timeouts.
    pub timings: Timings,
}

impl OperatorProfile {
    fn preset(
        package: &str,
        default_catalog: &str,
        fallback_display_name: &str,
        operator_namespace: &str,
        operator_group: &str,
        subscription: &str,
        deployment: &str,
    ) -> Self {
        OperatorProfile {
            package: package.to_string(),
            catalog_namespace: MARKETPLACE_NAMESPACE.to_string(),
            default_catalog: default_catalog.to_string(),
            fallback_index_image: None,
            fallback_catalog: None,
            fallback_display_name: fallback_display_name.to_string(),
            fallback_publisher: "Red Hat".to_string(),
            operator_namespace: operator_namespace.to_string(),
            operator_group: operator_group.to_string(),
            subscription: subscription.to_string(),
            deployment: deployment.to_string(),
            channel: None,
            install_plan_approval: "Automatic".to_string(),
            csv_prefix: format!("{}.", package),
            cache_eviction: CacheEviction::default(),
            timings: Timings::default(),
        }
    }

    /// The NVIDIA GPU Operator from the certified catalog.
    pub fn gpu() -> Self {
        OperatorProfile::preset(
            "gpu-operator-certified",
            "certified-operators",
            "Certified Operators Custom",
            "nvidia-gpu-operator",
            "gpu-og",
            "gpu-subscription",
            "gpu-operator",
        )
    }

    /// The NVIDIA Network Operator from the certified catalog.
    pub fn network() -> Self {
        OperatorProfile::preset(
            "nvidia-network-operator",
            "certified-operators",
            "Certified Operators Custom",
            "nvidia-network-operator",
            "nno-og",
            "nno-subscription",
            "nvidia-network-operator-controller-manager",
        )
    }

    /// Node Feature Discovery from the Red Hat catalog.
    pub fn nfd() -> Self {
        OperatorProfile::preset(
            "nfd",
            "redhat-operators",
            "Redhat Operators Custom",
            "openshift-nfd",
            "nfd-og",
            "nfd-subscription",
            "nfd-controller-manager",
        )
    }

    /// The name of the fallback catalog.
    pub fn fallback_catalog_name(&self) -> String {
        self.fallback_catalog
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.default_catalog, FALLBACK_CATALOG_SUFFIX))
    }
}

/// Overrides shared by every operator.
#[derive(Clone, Debug, Default)]
#[cfg(any(feature = "cli", feature = "docs"))]
#[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
pub struct ProfileOpts {
    /// The catalog searched first.
    pub catalog_source: Option<String>,
    /// The subscription channel, defaults to the package's default channel.
    pub channel: Option<String>,
    /// Index image for the fallback catalog.
    pub fallback_index_image: Option<String>,
}

#[cfg(any(feature = "cli", feature = "docs"))]
impl ProfileOpts {
    /// Applies the overrides that were given.
    pub fn apply(&self, mut profile: OperatorProfile) -> OperatorProfile {
        if let Some(catalog) = self.catalog_source.as_ref().filter(|c| !c.is_empty()) {
            profile.default_catalog = catalog.clone();
        }
        if let Some(channel) = self.channel.as_ref().filter(|c| !c.is_empty()) {
            profile.channel = Some(channel.clone());
        }
        if let Some(image) = self.fallback_index_image.as_ref().filter(|i| !i.is_empty()) {
            profile.fallback_index_image = Some(image.clone());
        }
        profile
    }
}

/// The operator to bootstrap.
#[derive(StructOpt, Clone, Debug)]
#[cfg(any(feature = "cli", feature = "docs"))]
#[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
pub enum OperatorOpts {
    /// The NVIDIA GPU Operator and its ClusterPolicy.
    Gpu {
        /// The catalog searched first.
        #[structopt(long = "catalog-source", env = "NVIDIAGPU_CATALOGSOURCE")]
        catalog_source: Option<String>,
        /// The subscription channel.
        #[structopt(long = "channel", env = "NVIDIAGPU_SUBSCRIPTION_CHANNEL")]
        channel: Option<String>,
        /// Index image for the fallback catalog.
        #[structopt(
            long = "fallback-index-image",
            env = "NVIDIAGPU_GPU_FALLBACK_CATALOGSOURCE_INDEX_IMAGE"
        )]
        fallback_index_image: Option<String>,
        /// Enable GPUDirect RDMA in the ClusterPolicy.
        #[structopt(long = "gpudirect-rdma")]
        gpu_direct_rdma: bool,
        /// Move the subscription to this channel once the ClusterPolicy is
        /// ready.
        #[structopt(
            long = "upgrade-to-channel",
            env = "NVIDIAGPU_SUBSCRIPTION_UPGRADE_TO_CHANNEL"
        )]
        upgrade_to_channel: Option<String>,
        /// Remove the ClusterPolicy and the operator at the end of the run
        /// (`true` or `false`).
        #[structopt(long = "cleanup", env = "NVIDIAGPU_CLEANUP")]
        cleanup: Option<bool>,
    },
    /// The NVIDIA Network Operator and its NicClusterPolicy.
    Network {
        /// The catalog searched first.
        #[structopt(long = "catalog-source", env = "NVIDIANETWORK_CATALOGSOURCE")]
        catalog_source: Option<String>,
        /// The subscription channel.
        #[structopt(long = "channel", env = "NVIDIANETWORK_SUBSCRIPTION_CHANNEL")]
        channel: Option<String>,
        /// Index image for the fallback catalog.
        #[structopt(
            long = "fallback-index-image",
            env = "NVIDIANETWORK_NNO_FALLBACK_CATALOGSOURCE_INDEX_IMAGE"
        )]
        fallback_index_image: Option<String>,
        /// MOFED driver image repository.
        #[structopt(long = "ofed-repository", env = "NVIDIANETWORK_OFED_REPOSITORY")]
        ofed_repository: Option<String>,
        /// MOFED driver version.
        #[structopt(long = "ofed-driver-version", env = "NVIDIANETWORK_OFED_DRIVER_VERSION")]
        ofed_driver_version: Option<String>,
        /// Move the subscription to this channel once the NicClusterPolicy is
        /// ready.
        #[structopt(
            long = "upgrade-to-channel",
            env = "NVIDIANETWORK_SUBSCRIPTION_UPGRADE_TO_CHANNEL"
        )]
        upgrade_to_channel: Option<String>,
        /// Remove the NicClusterPolicy and the operator at the end of the run
        /// (`true` or `false`).
        #[structopt(long = "cleanup", env = "NVIDIANETWORK_CLEANUP")]
        cleanup: Option<bool>,
    },
    /// Node Feature Discovery and its NodeFeatureDiscovery instance.
    Nfd {
        /// Index image for the fallback catalog.
        #[structopt(
            long = "fallback-index-image",
            env = "NFD_FALLBACK_CATALOGSOURCE_INDEX_IMAGE"
        )]
        fallback_index_image: Option<String>,
        /// PCI device classes to label, as 4 hex digits.
        #[structopt(long = "pci-device-class", use_delimiter = true)]
        pci_device_classes: Vec<String>,
        /// PCI fields used in the labels.
        #[structopt(long = "pci-label-field", use_delimiter = true)]
        pci_label_fields: Vec<String>,
        /// Remove the NodeFeatureDiscovery instance and the operator at the
        /// end of the run (`true` or `false`).
        #[structopt(long = "cleanup", env = "NFD_CLEANUP")]
        cleanup: Option<bool>,
    },
}

#[cfg(any(feature = "cli", feature = "docs"))]
impl OperatorOpts {
    /// The channel to upgrade the operator to, if any.
    pub fn upgrade_to_channel(&self) -> Option<&str> {
        match self {
            OperatorOpts::Gpu {
                upgrade_to_channel, ..
            }
            | OperatorOpts::Network {
                upgrade_to_channel, ..
            } => upgrade_to_channel.as_deref().filter(|c| !c.is_empty()),
            OperatorOpts::Nfd { .. } => None,
        }
    }

    /// Whether to tear the operator down at the end of the run. Off unless
    /// asked for.
    pub fn cleanup(&self) -> bool {
        let cleanup = match self {
            OperatorOpts::Gpu { cleanup, .. }
            | OperatorOpts::Network { cleanup, .. }
            | OperatorOpts::Nfd { cleanup, .. } => cleanup,
        };
        cleanup.unwrap_or(false)
    }
}

/// Command line options of the bootstrap tool.
#[derive(StructOpt, Clone, Debug)]
#[cfg(any(feature = "cli", feature = "docs"))]
#[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
#[structopt(
    name = "operator-bootstrap",
    about = "Installs an OLM operator from its default or a fallback catalog"
)]
pub struct Opts {
    /// Which operator to install.
    #[structopt(subcommand)]
    pub operator: OperatorOpts,

    /// Poll the default catalog for the package instead of checking once.
    #[structopt(long = "poll-default-catalog")]
    pub poll_default_catalog: bool,

    /// Stop after the operator is installed, without creating its policy
    /// resource.
    #[structopt(long = "skip-policy")]
    pub skip_policy: bool,
}

#[cfg(any(feature = "cli", feature = "docs"))]
impl Opts {
    /// Parses the options from the process arguments and environment.
    pub fn from_args_and_env() -> Self {
        Opts::from_args()
    }

    /// The preset for the chosen operator with the overrides applied.
    pub fn profile(&self) -> OperatorProfile {
        let (preset, overrides) = match &self.operator {
            OperatorOpts::Gpu {
                catalog_source,
                channel,
                fallback_index_image,
                ..
            } => (
                OperatorProfile::gpu(),
                ProfileOpts {
                    catalog_source: catalog_source.clone(),
                    channel: channel.clone(),
                    fallback_index_image: fallback_index_image.clone(),
                },
            ),
            OperatorOpts::Network {
                catalog_source,
                channel,
                fallback_index_image,
                ..
            } => (
                OperatorProfile::network(),
                ProfileOpts {
                    catalog_source: catalog_source.clone(),
                    channel: channel.clone(),
                    fallback_index_image: fallback_index_image.clone(),
                },
            ),
            OperatorOpts::Nfd {
                fallback_index_image,
                ..
            } => (
                OperatorProfile::nfd(),
                ProfileOpts {
                    fallback_index_image: fallback_index_image.clone(),
                    ..Default::default()
                },
            ),
        };
        let mut profile = overrides.apply(preset);
        if self.poll_default_catalog {
            profile.timings.default_probe = ProbeMode::Poll(profile.timings.package_manifest);
        }
        profile
    }
}
