//! OpenShift Machine API `MachineSet`, used to add GPU worker nodes.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::kind::{ManagedKind, Readiness};

/// Namespace the Machine API keeps its MachineSets in.
pub const MACHINE_API_NAMESPACE: &str = "openshift-machine-api";

/// Label carrying the role of the machines a MachineSet creates.
pub const MACHINE_ROLE_LABEL: &str = "machine.openshift.io/cluster-api-machine-role";

/// A group of identically configured machines.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "MachineSet",
    namespaced,
    status = "MachineSetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Desired number of machines. The Machine API defaults it to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Selector, template and the rest.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Observed state of a [`MachineSet`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    /// Machines created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Machines whose node is ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,
    /// Machines available for at least `minReadySeconds`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ManagedKind for MachineSet {
    const NAMESPACED: bool = true;
}

impl Readiness for MachineSet {
    fn is_ready(&self) -> bool {
        let desired = self.spec.replicas.unwrap_or(1);
        let ready = self
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        ready >= desired
    }
}
