//! An in-memory [`ObjectStore`] for unit tests.
//!
//! Objects are kept as JSON keyed by kind and [`ObjectKey`]. The store mimics
//! the API server closely enough for the lifecycle logic: 404 on missing
//! objects, 409 on duplicate creates and stale replaces, 422 on creates that
//! carry a resource version. Faults can be injected per kind and verb, and
//! reactors can play the part of controllers reacting to writes.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::error::ErrorResponse;
use serde_json::Value;

use super::{ObjectStore, Selector};
use crate::error::Operation;
use crate::kind::{ManagedKind, ObjectKey};

type Key = (String, ObjectKey);

/// A recorded call against the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Call {
    pub op: Operation,
    pub kind: String,
    pub target: String,
}

/// Mutable view of the stored objects handed to reactors.
pub(crate) struct Objects<'a> {
    map: &'a mut BTreeMap<Key, Value>,
    next_version: &'a mut u64,
}

impl<'a> Objects<'a> {
    pub fn insert<K: ManagedKind>(&mut self, object: K) {
        let mut value = serde_json::to_value(&object).expect("object serializes");
        stamp(&mut value, self.next_version);
        self.map.insert((K::kind_name(), object.object_key()), value);
    }

    pub fn modify<K: ManagedKind>(&mut self, key: &ObjectKey, f: impl FnOnce(&mut K)) {
        let slot = (K::kind_name(), key.clone());
        if let Some(value) = self.map.get(&slot) {
            let mut object: K = serde_json::from_value(value.clone()).expect("object decodes");
            f(&mut object);
            let mut value = serde_json::to_value(&object).expect("object serializes");
            stamp(&mut value, self.next_version);
            self.map.insert(slot, value);
        }
    }

    pub fn contains<K: ManagedKind>(&self, key: &ObjectKey) -> bool {
        self.map.contains_key(&(K::kind_name(), key.clone()))
    }
}

type Reactor = Box<dyn FnMut(&Call, &mut Objects<'_>) + Send>;

struct Fault {
    kind: String,
    op: Operation,
    code: u16,
    remaining: usize,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    next_version: u64,
    faults: Vec<Fault>,
    journal: Vec<Call>,
    reactors: Vec<Reactor>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<Inner>,
}

fn stamp(value: &mut Value, next_version: &mut u64) {
    *next_version += 1;
    value["metadata"]["resourceVersion"] = Value::String(next_version.to_string());
}

pub(crate) fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}

fn selects(value: &Value, namespace: Option<&str>, selector: &Selector) -> bool {
    if let Some(ns) = namespace {
        if value["metadata"]["namespace"].as_str() != Some(ns) {
            return false;
        }
    }
    let labels_match = selector
        .labels()
        .iter()
        .all(|(k, v)| value["metadata"]["labels"][k].as_str() == Some(v.as_str()));
    let fields_match = selector.fields().iter().all(|(path, v)| {
        let pointer = format!("/{}", path.replace('.', "/"));
        value.pointer(&pointer).and_then(Value::as_str) == Some(v.as_str())
    });
    labels_match && fields_match
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Seeds an object as if it had been created by someone else.
    pub fn insert<K: ManagedKind>(&self, object: K) {
        let mut inner = self.inner.lock().unwrap();
        let Inner {
            objects,
            next_version,
            ..
        } = &mut *inner;
        Objects {
            map: objects,
            next_version,
        }
        .insert(object);
    }

    pub fn modify<K: ManagedKind>(&self, key: &ObjectKey, f: impl FnOnce(&mut K)) {
        let mut inner = self.inner.lock().unwrap();
        let Inner {
            objects,
            next_version,
            ..
        } = &mut *inner;
        Objects {
            map: objects,
            next_version,
        }
        .modify(key, f);
    }

    pub fn object<K: ManagedKind>(&self, key: &ObjectKey) -> Option<K> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&(K::kind_name(), key.clone()))
            .map(|v| serde_json::from_value(v.clone()).expect("object decodes"))
    }

    /// Makes the next `times` calls of `op` on `kind` fail with `code`.
    pub fn fail(&self, kind: &str, op: Operation, code: u16, times: usize) {
        self.inner.lock().unwrap().faults.push(Fault {
            kind: kind.to_string(),
            op,
            code,
            remaining: times,
        });
    }

    pub fn react(&self, reactor: impl FnMut(&Call, &mut Objects<'_>) + Send + 'static) {
        self.inner.lock().unwrap().reactors.push(Box::new(reactor));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().journal.clone()
    }

    pub fn count(&self, op: Operation, kind: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.op == op && c.kind == kind)
            .count()
    }

    /// Journals the call and returns an injected fault, if one is armed.
    fn enter(&self, op: Operation, kind: &str, target: String) -> Result<(), kube::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.journal.push(Call {
            op,
            kind: kind.to_string(),
            target,
        });
        if let Some(fault) = inner
            .faults
            .iter_mut()
            .find(|f| f.kind == kind && f.op == op && f.remaining > 0)
        {
            fault.remaining -= 1;
            return Err(api_error(fault.code, "InjectedFault", "injected fault"));
        }
        Ok(())
    }

    fn react_to(&self, op: Operation, kind: &str, target: String) {
        let call = Call {
            op,
            kind: kind.to_string(),
            target,
        };
        let mut inner = self.inner.lock().unwrap();
        let Inner {
            objects,
            next_version,
            reactors,
            ..
        } = &mut *inner;
        for reactor in reactors.iter_mut() {
            reactor(
                &call,
                &mut Objects {
                    map: &mut *objects,
                    next_version: &mut *next_version,
                },
            );
        }
    }
}

#[async_trait]
impl<K: ManagedKind> ObjectStore<K> for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<K, kube::Error> {
        let kind = K::kind_name();
        self.enter(Operation::Get, &kind, key.to_string())?;
        self.object(key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{} {} not found", kind, key)))
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>, kube::Error> {
        let kind = K::kind_name();
        self.enter(Operation::List, &kind, selector.to_string())?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .objects
            .iter()
            .filter(|((k, _), v)| *k == kind && selects(v, namespace, selector))
            .map(|(_, v)| serde_json::from_value(v.clone()).expect("object decodes"))
            .collect())
    }

    async fn create(&self, object: &K) -> Result<K, kube::Error> {
        let kind = K::kind_name();
        let key = object.object_key();
        self.enter(Operation::Create, &kind, key.to_string())?;
        if object.meta().resource_version.is_some() {
            return Err(api_error(
                422,
                "Invalid",
                "metadata.resourceVersion: Invalid value: must be empty on create",
            ));
        }
        let created = {
            let mut inner = self.inner.lock().unwrap();
            let slot = (kind.clone(), key.clone());
            if inner.objects.contains_key(&slot) {
                let message = format!("{} {} already exists", kind, key);
                return Err(api_error(409, "AlreadyExists", message));
            }
            let mut value = serde_json::to_value(object).expect("object serializes");
            stamp(&mut value, &mut inner.next_version);
            inner.objects.insert(slot, value.clone());
            serde_json::from_value(value).expect("object decodes")
        };
        self.react_to(Operation::Create, &kind, key.to_string());
        Ok(created)
    }

    async fn replace(&self, object: &K) -> Result<K, kube::Error> {
        let kind = K::kind_name();
        let key = object.object_key();
        self.enter(Operation::Update, &kind, key.to_string())?;
        let replaced = {
            let mut inner = self.inner.lock().unwrap();
            let slot = (kind.clone(), key.clone());
            let current = match inner.objects.get(&slot) {
                Some(v) => v["metadata"]["resourceVersion"].as_str().map(str::to_owned),
                None => {
                    let message = format!("{} {} not found", kind, key);
                    return Err(api_error(404, "NotFound", message));
                }
            };
            match object.meta().resource_version.as_deref() {
                None => {
                    return Err(api_error(
                        422,
                        "Invalid",
                        "metadata.resourceVersion: Invalid value: must be specified for an update",
                    ))
                }
                Some(rv) if Some(rv) != current.as_deref() => {
                    return Err(api_error(409, "Conflict", "the object has been modified"))
                }
                _ => {}
            }
            let mut value = serde_json::to_value(object).expect("object serializes");
            stamp(&mut value, &mut inner.next_version);
            inner.objects.insert(slot, value.clone());
            serde_json::from_value(value).expect("object decodes")
        };
        self.react_to(Operation::Update, &kind, key.to_string());
        Ok(replaced)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), kube::Error> {
        let kind = K::kind_name();
        self.enter(Operation::Delete, &kind, key.to_string())?;
        let removed = self
            .inner
            .lock()
            .unwrap()
            .objects
            .remove(&(kind.clone(), key.clone()));
        if removed.is_none() {
            return Err(api_error(404, "NotFound", format!("{} {} not found", kind, key)));
        }
        self.react_to(Operation::Delete, &kind, key.to_string());
        Ok(())
    }

    async fn delete_collection(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<(), kube::Error> {
        let kind = K::kind_name();
        self.enter(Operation::DeleteCollection, &kind, selector.to_string())?;
        self.inner
            .lock()
            .unwrap()
            .objects
            .retain(|(k, _), v| !(*k == kind && selects(v, namespace, selector)));
        self.react_to(Operation::DeleteCollection, &kind, selector.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kinds::olm::{PackageManifest, PackageManifestSpec};

    fn manifest(name: &str, catalog: &str) -> PackageManifest {
        let mut pm = PackageManifest::new(name, PackageManifestSpec::default());
        pm.metadata.namespace = Some("openshift-marketplace".to_string());
        pm.metadata.labels = Some(
            vec![("catalog".to_string(), catalog.to_string())]
                .into_iter()
                .collect(),
        );
        pm
    }

    #[tokio::test]
    async fn list_filters_by_label_and_field() {
        let store = MemoryStore::new();
        store.insert(manifest("nfd", "redhat-operators"));
        store.insert(manifest("gpu-operator-certified", "certified-operators"));

        let selector = Selector::new()
            .label("catalog", "certified-operators")
            .field("metadata.name", "gpu-operator-certified");
        let found: Vec<PackageManifest> = store
            .list(Some("openshift-marketplace"), &selector)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let none: Vec<PackageManifest> = store
            .list(Some("other"), &Selector::new())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn stale_replace_conflicts() {
        let store = MemoryStore::new();
        store.insert(manifest("nfd", "redhat-operators"));
        let key = ObjectKey::namespaced("nfd", "openshift-marketplace");
        let mut stale: PackageManifest = store.object(&key).unwrap();
        stale.metadata.resource_version = Some("0".to_string());
        let err = ObjectStore::<PackageManifest>::replace(&store, &stale)
            .await
            .unwrap_err();
        assert!(matches!(err, kube::Error::Api(ErrorResponse { code: 409, .. })));
    }
}
