//! The GPU Operator's `ClusterPolicy`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::STATE_READY;
use crate::kind::{ManagedKind, Readiness};

/// Cluster wide configuration of the NVIDIA GPU stack.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "nvidia.com",
    version = "v1",
    kind = "ClusterPolicy",
    status = "ClusterPolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicySpec {
    /// The driver daemonset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverSpec>,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Driver settings of a [`ClusterPolicy`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverSpec {
    /// Driver image name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Driver image repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Driver image tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// GPUDirect RDMA.
    #[serde(rename = "rdma", skip_serializing_if = "Option::is_none")]
    pub gpu_direct_rdma: Option<GpuDirectRdmaSpec>,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// GPUDirect RDMA settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuDirectRdmaSpec {
    /// Whether GPUDirect RDMA is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Use the host's MOFED instead of the network operator's.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_host_mofed: Option<bool>,
}

/// Observed state of a [`ClusterPolicy`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterPolicyStatus {
    /// `ready` or `notReady`.
    #[serde(default)]
    pub state: String,
    /// Namespace the operands run in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ClusterPolicy {
    /// Turns GPUDirect RDMA on or off, creating the driver section if needed.
    pub fn set_gpu_direct_rdma(&mut self, enabled: bool) {
        let driver = self.spec.driver.get_or_insert_with(DriverSpec::default);
        driver
            .gpu_direct_rdma
            .get_or_insert_with(GpuDirectRdmaSpec::default)
            .enabled = Some(enabled);
    }
}

impl ManagedKind for ClusterPolicy {
    const NAMESPACED: bool = false;
}

impl Readiness for ClusterPolicy {
    fn is_ready(&self) -> bool {
        matches!(&self.status, Some(status) if status.state == STATE_READY)
    }
}
