//! Built-in Kubernetes kinds used while bootstrapping operators.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod};

use crate::kind::{ManagedKind, Readiness};

impl ManagedKind for Namespace {
    const NAMESPACED: bool = false;
}

impl ManagedKind for Deployment {
    const NAMESPACED: bool = true;
}

impl ManagedKind for Pod {
    const NAMESPACED: bool = true;
}

impl Readiness for Deployment {
    fn is_ready(&self) -> bool {
        let desired = self
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let ready = self
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        ready >= desired
    }
}
