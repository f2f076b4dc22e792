use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alm;
use crate::error::{is_not_found, Error, Operation};
use crate::kind::{ManagedKind, ObjectKey, Readiness};
use crate::poll::PollSpec;
use crate::store::ObjectStore;
use crate::wait;

/// Lifecycle of a single remote object of kind `K`.
///
/// The handle owns the desired state (`definition`) and the last state read
/// back from the cluster (`observed`). A handle can only be constructed around
/// a definition whose name and namespace fit the kind's scope, so operations
/// only ever fail on remote errors.
pub struct ResourceHandle<K: ManagedKind> {
    store: Arc<dyn ObjectStore<K>>,
    definition: K,
    observed: Option<K>,
}

/// Strips the fields the API server owns so the object can be created again.
fn fresh<K: ManagedKind>(definition: &K) -> K {
    let mut object = definition.clone();
    let meta = object.meta_mut();
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.managed_fields = None;
    object
}

impl<K: ManagedKind> ResourceHandle<K> {
    /// Wraps `definition` after checking its name and namespace.
    pub fn new(store: Arc<dyn ObjectStore<K>>, definition: K) -> Result<Self, Error> {
        definition.object_key().validate::<K>()?;
        Ok(ResourceHandle {
            store,
            definition,
            observed: None,
        })
    }

    /// Seeds the definition from the first `K` in an `alm-examples` blob.
    pub fn from_alm_examples(
        store: Arc<dyn ObjectStore<K>>,
        alm_examples: &str,
    ) -> Result<Self, Error> {
        let definition = alm::seed::<K>(alm_examples)?;
        Self::new(store, definition)
    }

    /// Reads the live object at `key` and uses it as both definition and
    /// observed state, so a following update carries the live resource
    /// version.
    pub async fn pull(store: Arc<dyn ObjectStore<K>>, key: ObjectKey) -> Result<Self, Error> {
        key.validate::<K>()?;
        debug!(kind = %K::kind_name(), %key, "pulling object");
        let live = match store.get(&key).await {
            Ok(live) => live,
            Err(e) if is_not_found(&e) => {
                return Err(Error::NotFound {
                    kind: K::kind_name(),
                    key,
                })
            }
            Err(e) => return Err(Error::remote(Operation::Get, K::kind_name(), key, e)),
        };
        Ok(ResourceHandle {
            store,
            definition: live.clone(),
            observed: Some(live),
        })
    }

    /// The identity of the managed object.
    pub fn key(&self) -> ObjectKey {
        self.definition.object_key()
    }

    /// The desired state.
    pub fn definition(&self) -> &K {
        &self.definition
    }

    /// Mutable access to the desired state, for edits before
    /// [`create`](Self::create) or [`update`](Self::update).
    pub fn definition_mut(&mut self) -> &mut K {
        &mut self.definition
    }

    /// The last state read from the cluster, if any.
    pub fn observed(&self) -> Option<&K> {
        self.observed.as_ref()
    }

    // The definition can be edited after construction, so every remote call
    // checks the key again.
    fn checked_key(&self) -> Result<ObjectKey, Error> {
        let key = self.key();
        key.validate::<K>()?;
        Ok(key)
    }

    /// Checks whether the object is on the cluster.
    ///
    /// A missing object is `Ok(false)`. Any other remote failure is returned
    /// as an error: the answer is unknown and must not be guessed.
    pub async fn exists(&mut self) -> Result<bool, Error> {
        let key = self.checked_key()?;
        debug!(kind = %K::kind_name(), %key, "checking object exists");
        match self.store.get(&key).await {
            Ok(live) => {
                self.observed = Some(live);
                Ok(true)
            }
            Err(e) if is_not_found(&e) => {
                self.observed = None;
                Ok(false)
            }
            Err(e) => {
                warn!(
                    kind = %K::kind_name(),
                    %key,
                    error = %e,
                    "unable to tell whether object exists"
                );
                Err(Error::remote(Operation::Get, K::kind_name(), key, e))
            }
        }
    }

    /// Reads the live object without touching the observed state.
    pub async fn get(&self) -> Result<K, Error> {
        let key = self.checked_key()?;
        debug!(kind = %K::kind_name(), %key, "getting object");
        self.store.get(&key).await.map_err(|e| {
            if is_not_found(&e) {
                Error::NotFound {
                    kind: K::kind_name(),
                    key,
                }
            } else {
                Error::remote(Operation::Get, K::kind_name(), key, e)
            }
        })
    }

    /// Creates the object unless it already exists.
    pub async fn create(&mut self) -> Result<&mut Self, Error> {
        if self.exists().await? {
            debug!(
                kind = %K::kind_name(),
                key = %self.key(),
                "object already exists, skipping creation"
            );
            return Ok(self);
        }
        let key = self.key();
        debug!(kind = %K::kind_name(), %key, "creating object");
        let created = self
            .store
            .create(&fresh(&self.definition))
            .await
            .map_err(|e| Error::remote(Operation::Create, K::kind_name(), &key, e))?;
        info!(kind = %K::kind_name(), %key, "created object");
        self.observed = Some(created);
        Ok(self)
    }

    /// Replaces the live object with the definition.
    ///
    /// The definition must carry the current resource version, which it does
    /// after [`pull`](Self::pull). When the replace fails and `force` is set,
    /// the live object is deleted and the definition created in its place.
    pub async fn update(&mut self, force: bool) -> Result<&mut Self, Error> {
        let key = self.checked_key()?;
        debug!(kind = %K::kind_name(), %key, force, "updating object");
        let attempt = self.store.replace(&self.definition).await;
        let replaced = match attempt {
            Ok(replaced) => replaced,
            Err(e) if force => {
                warn!(
                    kind = %K::kind_name(),
                    %key,
                    error = %e,
                    "update failed, deleting and re-creating object"
                );
                match self.store.delete(&key).await {
                    Ok(()) => {}
                    Err(e) if is_not_found(&e) => {}
                    Err(e) => return Err(Error::remote(Operation::Delete, K::kind_name(), key, e)),
                }
                self.observed = None;
                // An object held back by a finalizer is still found here and
                // kept as is.
                self.create().await?;
                match self.observed.clone() {
                    Some(created) => created,
                    None => {
                        return Err(Error::NotFound {
                            kind: K::kind_name(),
                            key,
                        })
                    }
                }
            }
            Err(e) => return Err(Error::remote(Operation::Update, K::kind_name(), key, e)),
        };
        self.definition.meta_mut().resource_version = replaced.meta().resource_version.clone();
        self.definition.meta_mut().uid = replaced.meta().uid.clone();
        self.observed = Some(replaced);
        Ok(self)
    }

    /// Deletes the object.
    ///
    /// Fails with [`Error::AlreadyAbsent`] when there is nothing to delete.
    pub async fn delete(&mut self) -> Result<&mut Self, Error> {
        if !self.exists().await? {
            return Err(Error::AlreadyAbsent {
                kind: K::kind_name(),
                key: self.key(),
            });
        }
        let key = self.key();
        debug!(kind = %K::kind_name(), %key, "deleting object");
        match self.store.delete(&key).await {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {
                self.observed = None;
                return Err(Error::AlreadyAbsent {
                    kind: K::kind_name(),
                    key,
                });
            }
            Err(e) => return Err(Error::remote(Operation::Delete, K::kind_name(), key, e)),
        }
        self.observed = None;
        Ok(self)
    }
}

impl<K: ManagedKind + Readiness> ResourceHandle<K> {
    /// Polls until the object reports ready and returns it.
    pub async fn wait_ready(
        &mut self,
        spec: &PollSpec,
        cancel: &CancellationToken,
    ) -> Result<&K, Error> {
        let key = self.checked_key()?;
        debug!(kind = %K::kind_name(), %key, "waiting for object to be ready");
        let ready = wait::until_ready(self.store.as_ref(), &key, spec, cancel).await?;
        info!(kind = %K::kind_name(), %key, "object is ready");
        let ready: &K = self.observed.insert(ready);
        Ok(ready)
    }

    /// Polls until the object reports ready again after being written past
    /// `resource_version`, and returns it.
    pub async fn wait_ready_since(
        &mut self,
        resource_version: &str,
        spec: &PollSpec,
        cancel: &CancellationToken,
    ) -> Result<&K, Error> {
        let key = self.checked_key()?;
        debug!(
            kind = %K::kind_name(),
            %key,
            resource_version,
            "waiting for object to be reconciled again"
        );
        let store = self.store.as_ref();
        let ready = wait::until_ready_since(store, &key, resource_version, spec, cancel).await?;
        info!(kind = %K::kind_name(), %key, "object is ready again");
        let ready: &K = self.observed.insert(ready);
        Ok(ready)
    }
}
