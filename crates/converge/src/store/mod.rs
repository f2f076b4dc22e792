//! Access to cluster objects.
//!
//! [`ObjectStore`] is the seam between the lifecycle logic and the API
//! server. [`KubeStore`] talks to a real cluster through `kube`.

use std::fmt;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::trace;

use crate::kind::{ManagedKind, ObjectKey};

#[cfg(test)]
pub(crate) mod memory;

/// Label and field selectors for list style calls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    labels: Vec<(String, String)>,
    fields: Vec<(String, String)>,
}

impl Selector {
    /// An empty selector, matching everything.
    pub fn new() -> Self {
        Selector::default()
    }

    /// Requires the label `key` to equal `value`.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Requires the field at `path` to equal `value`.
    pub fn field(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((path.into(), value.into()));
        self
    }

    /// The label requirements.
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    /// The field requirements.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    fn label_selector(&self) -> Option<String> {
        join(&self.labels)
    }

    fn field_selector(&self) -> Option<String> {
        join(&self.fields)
    }

    fn list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if let Some(labels) = self.label_selector() {
            params = params.labels(&labels);
        }
        if let Some(fields) = self.field_selector() {
            params = params.fields(&fields);
        }
        params
    }
}

fn join(pairs: &[(String, String)]) -> Option<String> {
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    )
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.label_selector(), self.field_selector()) {
            (None, None) => f.write_str("<all>"),
            (Some(l), None) => write!(f, "labels {}", l),
            (None, Some(s)) => write!(f, "fields {}", s),
            (Some(l), Some(s)) => write!(f, "labels {} fields {}", l, s),
        }
    }
}

/// The remote verbs the lifecycle logic needs for a kind.
///
/// Errors are returned untouched so callers can tell a missing object apart
/// from any other failure.
#[async_trait]
pub trait ObjectStore<K: ManagedKind>: Send + Sync {
    /// Reads a single object.
    async fn get(&self, key: &ObjectKey) -> Result<K, kube::Error>;

    /// Lists objects matching `selector`, across all namespaces when
    /// `namespace` is `None`.
    async fn list(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>, kube::Error>;

    /// Creates `object` and returns what the server stored.
    async fn create(&self, object: &K) -> Result<K, kube::Error>;

    /// Replaces the stored object. The object must carry the current
    /// resource version.
    async fn replace(&self, object: &K) -> Result<K, kube::Error>;

    /// Deletes a single object.
    async fn delete(&self, key: &ObjectKey) -> Result<(), kube::Error>;

    /// Deletes every object matching `selector` in `namespace`.
    async fn delete_collection(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<(), kube::Error>;
}

/// An [`ObjectStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wraps a kube client.
    pub fn new(client: Client) -> Self {
        KubeStore { client }
    }

    fn api<K: ManagedKind>(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

impl From<Client> for KubeStore {
    fn from(client: Client) -> Self {
        KubeStore::new(client)
    }
}

#[async_trait]
impl<K: ManagedKind> ObjectStore<K> for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<K, kube::Error> {
        trace!(kind = %K::kind_name(), %key, "GET");
        self.api::<K>(key.namespace()).get(&key.name).await
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>, kube::Error> {
        trace!(kind = %K::kind_name(), ?namespace, %selector, "LIST");
        let list = self
            .api::<K>(namespace)
            .list(&selector.list_params())
            .await?;
        Ok(list.items)
    }

    async fn create(&self, object: &K) -> Result<K, kube::Error> {
        let key = object.object_key();
        trace!(kind = %K::kind_name(), %key, "POST");
        self.api::<K>(key.namespace())
            .create(&PostParams::default(), object)
            .await
    }

    async fn replace(&self, object: &K) -> Result<K, kube::Error> {
        let key = object.object_key();
        trace!(kind = %K::kind_name(), %key, "PUT");
        self.api::<K>(key.namespace())
            .replace(&key.name, &PostParams::default(), object)
            .await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), kube::Error> {
        trace!(kind = %K::kind_name(), %key, "DELETE");
        self.api::<K>(key.namespace())
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
    }

    async fn delete_collection(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<(), kube::Error> {
        trace!(kind = %K::kind_name(), ?namespace, %selector, "DELETE collection");
        self.api::<K>(namespace)
            .delete_collection(&DeleteParams::default(), &selector.list_params())
            .await
            .map(|_| ())
    }
}
