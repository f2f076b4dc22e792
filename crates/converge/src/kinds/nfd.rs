//! The Node Feature Discovery operator's `NodeFeatureDiscovery`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::kind::{ManagedKind, Readiness};

const LABEL_FIELDS: &[&str] = &[
    "class",
    "vendor",
    "device",
    "subsystem_vendor",
    "subsystem_device",
];

/// A Node Feature Discovery deployment.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "nfd.openshift.io",
    version = "v1",
    kind = "NodeFeatureDiscovery",
    namespaced,
    status = "NodeFeatureDiscoveryStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeFeatureDiscoverySpec {
    /// The worker configuration file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_config: Option<WorkerConfigSpec>,
    /// Unmodeled fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Holds the worker's `nfd-worker.conf` as a YAML string.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfigSpec {
    /// The YAML document.
    #[serde(default)]
    pub config_data: String,
}

/// Observed state of a [`NodeFeatureDiscovery`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct NodeFeatureDiscoveryStatus {
    /// Operator conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A status condition.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct Condition {
    /// e.g. `Available`, `Degraded`.
    #[serde(rename = "type")]
    pub type_: String,
    /// `True`, `False` or `Unknown`.
    pub status: String,
    /// Machine readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct WorkerConfig {
    #[serde(default)]
    sources: Sources,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct Sources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pci: Option<PciSource>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct PciSource {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    device_class_whitelist: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    device_label_fields: Vec<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::validation("NodeFeatureDiscovery", reason)
}

impl NodeFeatureDiscovery {
    /// Adds PCI device classes and label fields to the worker configuration.
    ///
    /// Classes are four hex digits (`0302`, `0200`); label fields must be
    /// among `class`, `vendor`, `device`, `subsystem_vendor` and
    /// `subsystem_device`. Entries already present are not repeated and the
    /// rest of the worker configuration is kept as is.
    pub fn update_pci_devices(
        &mut self,
        device_classes: &[&str],
        label_fields: &[&str],
    ) -> Result<(), Error> {
        for class in device_classes {
            if class.len() != 4 || !class.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid(format!(
                    "invalid device class ID {}, expected 4 hexadecimal digits",
                    class
                )));
            }
        }
        if let Some(field) = label_fields.iter().find(|f| !LABEL_FIELDS.contains(*f)) {
            return Err(invalid(format!(
                "invalid label field {}, must be one of {}",
                field,
                LABEL_FIELDS.join(", ")
            )));
        }

        let worker = match self.spec.worker_config.as_mut() {
            Some(w) if !w.config_data.trim().is_empty() => w,
            _ => return Err(invalid("worker config data is not initialized")),
        };
        let mut config: WorkerConfig = serde_yaml::from_str(&worker.config_data)
            .map_err(|e| invalid(format!("worker config is not valid YAML: {}", e)))?;

        let pci = config.sources.pci.get_or_insert_with(PciSource::default);
        for class in device_classes {
            if !pci.device_class_whitelist.iter().any(|c| c == class) {
                pci.device_class_whitelist.push(class.to_string());
            }
        }
        for field in label_fields {
            if !pci.device_label_fields.iter().any(|f| f == field) {
                pci.device_label_fields.push(field.to_string());
            }
        }

        worker.config_data = serde_yaml::to_string(&config)
            .map_err(|e| invalid(format!("failed to render worker config: {}", e)))?;
        Ok(())
    }
}

impl ManagedKind for NodeFeatureDiscovery {
    const NAMESPACED: bool = true;
}

impl Readiness for NodeFeatureDiscovery {
    fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .any(|c| c.type_ == "Available" && c.status == "True")
            })
            .unwrap_or(false)
    }
}
