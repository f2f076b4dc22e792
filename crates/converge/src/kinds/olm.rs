//! Operator Lifecycle Manager kinds.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::alm::ALM_EXAMPLES_ANNOTATION;
use crate::kind::{ManagedKind, Readiness};

/// The connection state a healthy gRPC catalog reports.
pub const CATALOG_READY: &str = "READY";
/// The phase of a fully installed ClusterServiceVersion.
pub const CSV_SUCCEEDED: &str = "Succeeded";
/// The label package manifests carry naming their catalog.
pub const CATALOG_LABEL: &str = "catalog";

/// A source of operator packages, usually an index image served over gRPC.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "CatalogSource",
    namespaced,
    status = "CatalogSourceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceSpec {
    /// `grpc` for index images.
    pub source_type: String,
    /// The index image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Name shown in the console.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Publisher shown in the console.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Observed state of a [`CatalogSource`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    /// The state of the gRPC connection to the registry pod.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<GrpcConnectionState>,
}

/// Connection details of a gRPC catalog.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrpcConnectionState {
    /// The registry address.
    #[serde(default)]
    pub address: String,
    /// `READY`, `CONNECTING`, `TRANSIENT_FAILURE` and so on.
    #[serde(default)]
    pub last_observed_state: String,
}

impl CatalogSource {
    /// A gRPC catalog serving `image` in `namespace`.
    pub fn grpc(name: &str, namespace: &str, image: &str) -> Self {
        let mut catalog = CatalogSource::new(
            name,
            CatalogSourceSpec {
                source_type: "grpc".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            },
        );
        catalog.metadata.namespace = Some(namespace.to_string());
        catalog
    }
}

impl ManagedKind for CatalogSource {
    const NAMESPACED: bool = true;
}

impl Readiness for CatalogSource {
    fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.connection_state.as_ref())
            .map(|c| c.last_observed_state == CATALOG_READY)
            .unwrap_or(false)
    }
}

/// A request to install and keep up to date an operator package.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    namespaced,
    status = "SubscriptionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// The package name.
    pub name: String,
    /// The catalog providing the package.
    pub source: String,
    /// The namespace of the catalog.
    pub source_namespace: String,
    /// The update channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// `Automatic` or `Manual`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<String>,
    /// Pins the first installed version.
    #[serde(rename = "startingCSV", skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,
}

/// Observed state of a [`Subscription`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// The CSV OLM is converging to.
    #[serde(rename = "currentCSV", skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,
    /// The CSV that is installed.
    #[serde(rename = "installedCSV", skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,
    /// e.g. `AtLatestKnown`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl ManagedKind for Subscription {
    const NAMESPACED: bool = true;
}

/// Selects the namespaces an operator watches.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    /// Namespaces the operator watches. Empty means all namespaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,
}

impl ManagedKind for OperatorGroup {
    const NAMESPACED: bool = true;
}

/// The package-server view of a package in a catalog.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "packages.operators.coreos.com",
    version = "v1",
    kind = "PackageManifest",
    namespaced,
    status = "PackageManifestStatus"
)]
pub struct PackageManifestSpec {}

/// What a catalog offers for a package.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifestStatus {
    /// The catalog serving the package.
    #[serde(default)]
    pub catalog_source: String,
    /// The namespace of that catalog.
    #[serde(default)]
    pub catalog_source_namespace: String,
    /// The package name.
    #[serde(default)]
    pub package_name: String,
    /// The channel subscriptions use when they name none.
    #[serde(default)]
    pub default_channel: String,
    /// Every channel of the package.
    #[serde(default)]
    pub channels: Vec<PackageChannel>,
}

/// A channel of a package.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct PackageChannel {
    /// The channel name.
    pub name: String,
    /// The head of the channel.
    #[serde(rename = "currentCSV", default)]
    pub current_csv: String,
}

impl PackageManifest {
    /// The default channel, if the package server reported one.
    pub fn default_channel(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.default_channel.as_str())
            .filter(|c| !c.is_empty())
    }
}

impl ManagedKind for PackageManifest {
    const NAMESPACED: bool = true;
}

/// An installed (or installing) operator version.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    namespaced,
    status = "ClusterServiceVersionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    /// The operator version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Human readable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Observed state of a [`ClusterServiceVersion`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterServiceVersionStatus {
    /// `Pending`, `Installing`, `Succeeded`, `Failed`...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Machine readable reason for the phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClusterServiceVersion {
    /// The raw `alm-examples` annotation.
    pub fn alm_examples(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ALM_EXAMPLES_ANNOTATION))
            .map(String::as_str)
    }

    /// The current phase, empty if none was reported yet.
    pub fn phase(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("")
    }
}

impl ManagedKind for ClusterServiceVersion {
    const NAMESPACED: bool = true;
}

impl Readiness for ClusterServiceVersion {
    fn is_ready(&self) -> bool {
        self.phase() == CSV_SUCCEEDED
    }
}
