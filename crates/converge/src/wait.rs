//! Waits for objects to appear, become ready or go away.
//!
//! Predicates built here never end a wait on a remote failure: a missing
//! object is "not yet" and any other error is logged and retried on the next
//! tick. Only the deadline or cancellation stops them.

use kube::Resource;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{is_not_found, Error};
use crate::kind::{ManagedKind, ObjectKey, Readiness};
use crate::poll::{poll_until, PollSpec};
use crate::store::{ObjectStore, Selector};

/// Waits for the object at `key` to exist and returns it.
pub async fn until_exists<K: ManagedKind>(
    store: &dyn ObjectStore<K>,
    key: &ObjectKey,
    spec: &PollSpec,
    cancel: &CancellationToken,
) -> Result<K, Error> {
    until(store, key, spec, cancel, |_| true).await
}

/// Waits for the object at `key` to report ready and returns it.
pub async fn until_ready<K: ManagedKind + Readiness>(
    store: &dyn ObjectStore<K>,
    key: &ObjectKey,
    spec: &PollSpec,
    cancel: &CancellationToken,
) -> Result<K, Error> {
    until(store, key, spec, cancel, K::is_ready).await
}

/// Waits for the object at `key` to report ready at a resource version other
/// than `resource_version`, i.e. after it was written again.
pub async fn until_ready_since<K: ManagedKind + Readiness>(
    store: &dyn ObjectStore<K>,
    key: &ObjectKey,
    resource_version: &str,
    spec: &PollSpec,
    cancel: &CancellationToken,
) -> Result<K, Error> {
    until(store, key, spec, cancel, |object: &K| {
        object.meta().resource_version.as_deref() != Some(resource_version) && object.is_ready()
    })
    .await
}

async fn until<K, F>(
    store: &dyn ObjectStore<K>,
    key: &ObjectKey,
    spec: &PollSpec,
    cancel: &CancellationToken,
    accept: F,
) -> Result<K, Error>
where
    K: ManagedKind,
    F: Fn(&K) -> bool + Sync,
{
    let kind = K::kind_name();
    let found = Mutex::new(None);
    let slot = &found;
    let accept = &accept;
    let kind_ref = kind.as_str();
    poll_until(spec, cancel, move || async move {
        match store.get(key).await {
            Ok(object) if accept(&object) => {
                *slot.lock().await = Some(object);
                Ok(true)
            }
            Ok(_) => {
                debug!(kind = kind_ref, %key, "waiting for object to become ready");
                Ok(false)
            }
            Err(e) if is_not_found(&e) => {
                debug!(kind = kind_ref, %key, "waiting for object to be created");
                Ok(false)
            }
            Err(e) => {
                warn!(
                    kind = kind_ref,
                    %key,
                    error = %e,
                    "transient error while waiting for object"
                );
                Ok(false)
            }
        }
    })
    .await?;
    found.into_inner().ok_or(Error::NotFound {
        kind,
        key: key.clone(),
    })
}

/// Waits for the object at `key` to be gone from the cluster.
pub async fn until_deleted<K: ManagedKind>(
    store: &dyn ObjectStore<K>,
    key: &ObjectKey,
    spec: &PollSpec,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let kind = K::kind_name();
    let kind_ref = kind.as_str();
    poll_until(spec, cancel, move || async move {
        match store.get(key).await {
            Err(e) if is_not_found(&e) => Ok(true),
            Ok(_) => {
                debug!(kind = kind_ref, %key, "waiting for object to be deleted");
                Ok(false)
            }
            Err(e) => {
                warn!(
                    kind = kind_ref,
                    %key,
                    error = %e,
                    "transient error while waiting for deletion"
                );
                Ok(false)
            }
        }
    })
    .await
}

/// Waits for at least one object to match `selector` and returns the matches.
pub async fn until_listed<K: ManagedKind>(
    store: &dyn ObjectStore<K>,
    namespace: Option<&str>,
    selector: &Selector,
    spec: &PollSpec,
    cancel: &CancellationToken,
) -> Result<Vec<K>, Error> {
    let kind = K::kind_name();
    let found = Mutex::new(Vec::new());
    let slot = &found;
    let kind_ref = kind.as_str();
    poll_until(spec, cancel, move || async move {
        match store.list(namespace, selector).await {
            Ok(items) if !items.is_empty() => {
                *slot.lock().await = items;
                Ok(true)
            }
            Ok(_) => {
                debug!(kind = kind_ref, ?namespace, %selector, "nothing listed yet");
                Ok(false)
            }
            Err(e) => {
                warn!(
                    kind = kind_ref,
                    ?namespace,
                    %selector,
                    error = %e,
                    "transient error while listing"
                );
                Ok(false)
            }
        }
    })
    .await?;
    Ok(found.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Operation;
    use crate::kinds::olm::{CatalogSource, CatalogSourceStatus, GrpcConnectionState};
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn key() -> ObjectKey {
        ObjectKey::namespaced("certified-operators-custom", "openshift-marketplace")
    }

    fn catalog() -> CatalogSource {
        CatalogSource::grpc(
            "certified-operators-custom",
            "openshift-marketplace",
            "index:latest",
        )
    }

    fn mark_ready(catalog: &mut CatalogSource) {
        catalog.status = Some(CatalogSourceStatus {
            connection_state: Some(GrpcConnectionState {
                address: "certified-operators-custom.openshift-marketplace.svc:50051".to_string(),
                last_observed_state: "READY".to_string(),
            }),
        })
    }

    fn spec() -> PollSpec {
        PollSpec::new(Duration::from_secs(10), Duration::from_secs(240))
    }

    #[tokio::test(start_paused = true)]
    async fn ready_wait_tolerates_transient_errors() {
        let store = Arc::new(MemoryStore::new());
        store.fail("CatalogSource", Operation::Get, 500, 2);
        store.insert(catalog());

        let registry = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            registry.modify::<CatalogSource>(&key(), mark_ready);
        });

        let start = tokio::time::Instant::now();
        let ready =
            until_ready::<CatalogSource>(&*store, &key(), &spec(), &CancellationToken::new())
                .await
                .unwrap();
        assert!(ready.is_ready());
        // 500, 500, not ready, ready
        assert_eq!(store.count(Operation::Get, "CatalogSource"), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_since_waits_for_a_new_version() {
        let store = Arc::new(MemoryStore::new());
        let mut ready = catalog();
        mark_ready(&mut ready);
        store.insert(ready);
        let seen: CatalogSource = store.object(&key()).unwrap();
        let version = seen.metadata.resource_version.unwrap();

        let registry = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            registry.modify::<CatalogSource>(&key(), |c| c.status = None);
            tokio::time::sleep(Duration::from_secs(10)).await;
            registry.modify::<CatalogSource>(&key(), mark_ready);
        });

        let start = tokio::time::Instant::now();
        let again = until_ready_since::<CatalogSource>(
            &*store,
            &key(),
            &version,
            &spec(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(again.is_ready());
        assert_ne!(again.metadata.resource_version.as_deref(), Some(version.as_str()));
        // ready but unchanged at 0 and 10, changed but not ready at 20
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_wait_returns_once_gone() {
        let store = Arc::new(MemoryStore::new());
        store.insert(catalog());

        let registry = store.clone();
        tokio::spawn(async move {
            // a finalizer holds the object for a while
            tokio::time::sleep(Duration::from_secs(25)).await;
            ObjectStore::<CatalogSource>::delete(&*registry, &key()).await.unwrap();
        });

        let start = tokio::time::Instant::now();
        until_deleted::<CatalogSource>(&*store, &key(), &spec(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(30));

        // nothing to wait for the second time
        until_deleted::<CatalogSource>(&*store, &key(), &spec(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_wait_times_out_on_lingering_object() {
        let store = MemoryStore::new();
        store.insert(catalog());
        store.fail("CatalogSource", Operation::Get, 500, 1);
        let cancel = CancellationToken::new();
        let result = until_deleted::<CatalogSource>(&store, &key(), &spec(), &cancel).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert!(store.object::<CatalogSource>(&key()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn ready_wait_times_out() {
        let store = MemoryStore::new();
        store.insert(catalog());
        let start = tokio::time::Instant::now();
        let cancel = CancellationToken::new();
        let result = until_ready::<CatalogSource>(&store, &key(), &spec(), &cancel).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(240));
    }

    #[tokio::test(start_paused = true)]
    async fn exists_wait_returns_once_created() {
        let store = MemoryStore::new();
        store.fail("CatalogSource", Operation::Get, 404, 3);
        store.insert(catalog());
        let start = tokio::time::Instant::now();
        let cancel = CancellationToken::new();
        let found = until_exists::<CatalogSource>(&store, &key(), &spec(), &cancel)
            .await
            .unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("certified-operators-custom"));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn listed_wait_returns_matches() {
        let store = MemoryStore::new();
        store.insert(catalog());
        let selector = Selector::new().field("metadata.name", "certified-operators-custom");
        let items = until_listed::<CatalogSource>(
            &store,
            Some("openshift-marketplace"),
            &selector,
            &spec(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(items.len(), 1);

        let nothing = until_listed::<CatalogSource>(
            &store,
            Some("openshift-nfd"),
            &selector,
            &spec(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(nothing, Err(Error::Timeout { .. })));
    }
}
