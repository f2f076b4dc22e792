//! Kinds owned by the NVIDIA Network Operator (`mellanox.com/v1alpha1`).
//!
//! All of them are cluster scoped and report a single `state` string.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::STATE_READY;
use crate::kind::{ManagedKind, Readiness};

/// The observed state shared by the network operator's kinds.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct NetworkStatus {
    /// `ready`, `notReady`, `error`...
    #[serde(default)]
    pub state: String,
    /// Why the resource is not ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Cluster wide configuration of the NVIDIA network stack.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "mellanox.com",
    version = "v1alpha1",
    kind = "NicClusterPolicy",
    status = "NetworkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NicClusterPolicySpec {
    /// The MOFED driver container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ofed_driver: Option<OfedDriverSpec>,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Image coordinates of the MOFED driver.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OfedDriverSpec {
    /// Image name.
    #[serde(default)]
    pub image: String,
    /// Image repository.
    #[serde(default)]
    pub repository: String,
    /// Image tag.
    #[serde(default)]
    pub version: String,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A macvlan secondary network attachment.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "mellanox.com",
    version = "v1alpha1",
    kind = "MacvlanNetwork",
    status = "NetworkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MacvlanNetworkSpec {
    /// Namespace the NetworkAttachmentDefinition is rendered into.
    #[serde(default)]
    pub network_namespace: String,
    /// Host interface the macvlan sits on.
    #[serde(default)]
    pub master: String,
    /// `bridge`, `private`, `vepa` or `passthru`.
    #[serde(default)]
    pub mode: String,
    /// Interface MTU.
    #[serde(default)]
    pub mtu: i64,
    /// IPAM configuration as a JSON string.
    #[serde(default)]
    pub ipam: String,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// An IP over InfiniBand secondary network attachment.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "mellanox.com",
    version = "v1alpha1",
    kind = "IPoIBNetwork",
    status = "NetworkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct IPoIBNetworkSpec {
    /// Namespace the NetworkAttachmentDefinition is rendered into.
    #[serde(default)]
    pub network_namespace: String,
    /// Host InfiniBand interface.
    #[serde(default)]
    pub master: String,
    /// IPAM configuration as a JSON string.
    #[serde(default)]
    pub ipam: String,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

macro_rules! cluster_scoped_with_state {
    ($($kind:ty),+) => {
        $(
            impl ManagedKind for $kind {
                const NAMESPACED: bool = false;
            }

            impl Readiness for $kind {
                fn is_ready(&self) -> bool {
                    matches!(&self.status, Some(status) if status.state == STATE_READY)
                }
            }
        )+
    };
}

cluster_scoped_with_state!(NicClusterPolicy, MacvlanNetwork, IPoIBNetwork);
