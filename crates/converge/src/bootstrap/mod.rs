//! Brings an OLM operator up from its default catalog, or from a fallback
//! catalog built from an index image when the default one lacks the package.
//!
//! [`CatalogBootstrap::resolve`] walks the [`Stage`]s until the package is
//! found or the run is skipped. [`CatalogBootstrap::install`] subscribes to
//! the package and waits for the operator deployment, evicting OLM's catalog
//! cache and retrying once when it does not show up.
//! [`CatalogBootstrap::deploy`] does both and returns the installed
//! ClusterServiceVersion. [`CatalogBootstrap::upgrade`] moves an installed
//! operator to another channel and [`CatalogBootstrap::teardown`] removes it.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{OperatorProfile, ProbeMode};
use crate::error::{is_not_found, Error, Operation, Result};
use crate::handle::ResourceHandle;
use crate::kind::{ManagedKind, ObjectKey};
use crate::kinds::olm::{
    CatalogSource, ClusterServiceVersion, OperatorGroup, OperatorGroupSpec, PackageManifest,
    Subscription, SubscriptionSpec, CATALOG_LABEL,
};
use crate::poll;
use crate::store::{ObjectStore, Selector};
use crate::wait;

mod observer;
mod state;

pub use observer::{BootstrapObserver, TracingObserver};
pub use state::{BootstrapState, Resolution, Stage};

const NAMESPACE_LABELS: &[(&str, &str)] = &[
    ("openshift.io/cluster-monitoring", "true"),
    ("pod-security.kubernetes.io/enforce", "privileged"),
];

/// A store able to serve every kind the bootstrap workflow touches.
pub trait ClusterStore:
    ObjectStore<CatalogSource>
    + ObjectStore<PackageManifest>
    + ObjectStore<Subscription>
    + ObjectStore<OperatorGroup>
    + ObjectStore<ClusterServiceVersion>
    + ObjectStore<Namespace>
    + ObjectStore<Deployment>
    + ObjectStore<Pod>
    + 'static
{
}

impl<T> ClusterStore for T where
    T: ObjectStore<CatalogSource>
        + ObjectStore<PackageManifest>
        + ObjectStore<Subscription>
        + ObjectStore<OperatorGroup>
        + ObjectStore<ClusterServiceVersion>
        + ObjectStore<Namespace>
        + ObjectStore<Deployment>
        + ObjectStore<Pod>
        + 'static
{
}

/// How a bootstrap run ended when it did not fail.
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    /// The run went through.
    Ready(T),
    /// The package is unavailable and nothing was installed.
    Skipped(String),
}

/// An installed operator.
#[derive(Clone, Debug)]
pub struct Deployed {
    /// Where the package came from.
    pub resolution: Resolution,
    /// The operator deployment.
    pub deployment: Deployment,
    /// The installed ClusterServiceVersion, in phase `Succeeded`.
    pub csv: ClusterServiceVersion,
}

impl Deployed {
    /// The default definitions shipped with the operator.
    pub fn alm_examples(&self) -> Option<&str> {
        self.csv.alm_examples()
    }
}

/// The bootstrap workflow for one operator package.
pub struct CatalogBootstrap<S> {
    store: Arc<S>,
    profile: OperatorProfile,
    observer: Arc<dyn BootstrapObserver>,
    cancel: CancellationToken,
    await_deployment_ready: bool,
}

impl<S: ClusterStore> CatalogBootstrap<S> {
    /// A workflow reporting through [`TracingObserver`] that is never
    /// cancelled.
    pub fn new(store: Arc<S>, profile: OperatorProfile) -> Self {
        CatalogBootstrap {
            store,
            profile,
            observer: Arc::new(TracingObserver),
            cancel: CancellationToken::new(),
            await_deployment_ready: true,
        }
    }

    /// Reports progress to `observer` instead.
    pub fn with_observer(mut self, observer: Arc<dyn BootstrapObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Aborts every wait and grace period once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether [`deploy`](Self::deploy) waits for the operator deployment to
    /// be ready before looking for its ClusterServiceVersion. On by default.
    pub fn await_deployment_ready(mut self, wait: bool) -> Self {
        self.await_deployment_ready = wait;
        self
    }

    /// The profile the workflow runs with.
    pub fn profile(&self) -> &OperatorProfile {
        &self.profile
    }

    fn api<K: ManagedKind>(&self) -> &dyn ObjectStore<K>
    where
        S: ObjectStore<K>,
    {
        &*self.store
    }

    fn handle<K: ManagedKind>(&self, definition: K) -> Result<ResourceHandle<K>>
    where
        S: ObjectStore<K>,
    {
        let store: Arc<dyn ObjectStore<K>> = self.store.clone();
        ResourceHandle::new(store, definition)
    }

    /// Finds the catalog that serves the package, provisioning the fallback
    /// catalog when needed.
    #[instrument(level = "info", skip(self), fields(package = %self.profile.package))]
    pub async fn resolve(&self) -> Result<Outcome<Resolution>> {
        let package = self.profile.package.as_str();
        let mut state = BootstrapState::new(&self.profile.default_catalog);
        let mut stage = Stage::ProbingDefault;
        loop {
            self.observer.stage_entered(package, &stage);
            stage = match stage {
                Stage::Resolved(resolution) => return Ok(Outcome::Ready(resolution)),
                Stage::Skipped(reason) => return Ok(Outcome::Skipped(reason)),
                current => {
                    let from = current.name();
                    match self.next(current, &mut state).await {
                        Ok(next) => {
                            trace!(from, to = next.name(), "stage transition");
                            next
                        }
                        Err(e) => {
                            self.observer.failed(package, from, &e);
                            return Err(e);
                        }
                    }
                }
            };
        }
    }

    async fn next(&self, stage: Stage, state: &mut BootstrapState) -> Result<Stage> {
        let profile = &self.profile;
        match stage {
            Stage::ProbingDefault => {
                match self
                    .probe(&profile.default_catalog, profile.timings.default_probe)
                    .await
                {
                    Ok(manifest) => Ok(self.resolved(&manifest, state)),
                    Err(e @ Error::Cancelled) | Err(e @ Error::AmbiguousPackage { .. }) => Err(e),
                    Err(e) => {
                        self.observer
                            .probe_missed(&profile.package, &profile.default_catalog, &e);
                        if profile.fallback_index_image.is_some() {
                            Ok(Stage::ProvisioningFallback)
                        } else {
                            Ok(Stage::Skipped(format!(
                                "package {} is not available in catalog {} \
                                 and no fallback index image is configured",
                                profile.package, profile.default_catalog
                            )))
                        }
                    }
                }
            }
            Stage::ProvisioningFallback => {
                let image = profile.fallback_index_image.as_deref().ok_or_else(|| {
                    Error::validation("CatalogSource", "no fallback index image configured")
                })?;
                let name = profile.fallback_catalog_name();
                let mut catalog = CatalogSource::grpc(&name, &profile.catalog_namespace, image);
                catalog.spec.display_name = Some(profile.fallback_display_name.clone());
                catalog.spec.publisher = Some(profile.fallback_publisher.clone());
                self.handle(catalog)?.create().await?;
                info!(catalog = %name, %image, "created fallback catalog");
                state.discovery_source = name;
                state.using_fallback = true;
                poll::sleep(profile.timings.catalog_creation_delay, &self.cancel).await?;
                Ok(Stage::AwaitingFallbackReady)
            }
            Stage::AwaitingFallbackReady => {
                let key =
                    ObjectKey::namespaced(&state.discovery_source, &profile.catalog_namespace);
                wait::until_ready(
                    self.api::<CatalogSource>(),
                    &key,
                    &profile.timings.catalog_ready,
                    &self.cancel,
                )
                .await?;
                Ok(Stage::ProbingFallback)
            }
            Stage::ProbingFallback => {
                let manifest = self
                    .probe(
                        &state.discovery_source,
                        ProbeMode::Poll(profile.timings.package_manifest),
                    )
                    .await?;
                Ok(self.resolved(&manifest, state))
            }
            terminal => Ok(terminal),
        }
    }

    fn resolved(&self, manifest: &PackageManifest, state: &BootstrapState) -> Stage {
        let channel = self
            .profile
            .channel
            .clone()
            .or_else(|| manifest.default_channel().map(str::to_string));
        Stage::Resolved(Resolution {
            catalog: state.discovery_source.clone(),
            channel,
            state: state.clone(),
        })
    }

    /// Looks the package up in `catalog`.
    ///
    /// A package missing from the catalog is [`Error::NotFound`] in
    /// [`ProbeMode::Once`] and [`Error::Timeout`] in [`ProbeMode::Poll`].
    pub async fn probe(&self, catalog: &str, mode: ProbeMode) -> Result<PackageManifest> {
        let profile = &self.profile;
        let selector = Selector::new()
            .label(CATALOG_LABEL, catalog)
            .field("metadata.name", profile.package.as_str());
        let namespace = Some(profile.catalog_namespace.as_str());
        debug!(package = %profile.package, catalog, ?mode, "probing catalog for package");
        let mut manifests = match mode {
            ProbeMode::Once => self
                .api::<PackageManifest>()
                .list(namespace, &selector)
                .await
                .map_err(|e| {
                    Error::remote(Operation::List, PackageManifest::kind_name(), &selector, e)
                })?,
            ProbeMode::Poll(spec) => {
                wait::until_listed(
                    self.api::<PackageManifest>(),
                    namespace,
                    &selector,
                    &spec,
                    &self.cancel,
                )
                .await?
            }
        };
        match manifests.len() {
            0 => Err(Error::NotFound {
                kind: PackageManifest::kind_name(),
                key: ObjectKey::namespaced(&profile.package, &profile.catalog_namespace),
            }),
            1 => Ok(manifests.remove(0)),
            count => Err(Error::AmbiguousPackage {
                package: profile.package.clone(),
                catalog: catalog.to_string(),
                count,
            }),
        }
    }

    /// Subscribes to the resolved package and waits for the operator
    /// deployment to exist.
    ///
    /// When the deployment does not show up in time, the subscription and
    /// the package's ClusterServiceVersions are deleted, the OLM pods are
    /// deleted to flush their catalog cache, and the subscription is made
    /// once more. A second miss is [`Error::BootstrapExhausted`].
    #[instrument(
        level = "info",
        skip(self, resolution),
        fields(package = %self.profile.package, catalog = %resolution.catalog)
    )]
    pub async fn install(&self, resolution: &mut Resolution) -> Result<Deployment> {
        let package = &self.profile.package;
        self.ensure_namespace().await?;
        self.ensure_operator_group().await?;

        let first = match self.subscribe(resolution).await {
            Ok(deployment) => return Ok(self.installed(deployment)),
            Err(e @ Error::Timeout { .. }) => e,
            Err(e) => return Err(e),
        };
        if resolution.state.attempted_cache_eviction {
            return Err(Error::BootstrapExhausted {
                package: package.clone(),
                source: Box::new(first),
            });
        }

        self.observer.recovery_started(package, &first);
        resolution.state.attempted_cache_eviction = true;
        self.evict_catalog_cache().await?;
        match self.subscribe(resolution).await {
            Ok(deployment) => Ok(self.installed(deployment)),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => Err(Error::BootstrapExhausted {
                package: package.clone(),
                source: Box::new(e),
            }),
        }
    }

    fn installed(&self, deployment: Deployment) -> Deployment {
        self.observer
            .installed(&self.profile.package, &self.profile.deployment);
        deployment
    }

    async fn ensure_namespace(&self) -> Result<()> {
        let labels: BTreeMap<String, String> = NAMESPACE_LABELS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(self.profile.operator_namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        self.handle(namespace)?.create().await?;
        Ok(())
    }

    async fn ensure_operator_group(&self) -> Result<()> {
        let profile = &self.profile;
        let mut group = OperatorGroup::new(
            &profile.operator_group,
            OperatorGroupSpec {
                target_namespaces: vec![profile.operator_namespace.clone()],
            },
        );
        group.metadata.namespace = Some(profile.operator_namespace.clone());
        self.handle(group)?.create().await?;
        Ok(())
    }

    async fn subscribe(&self, resolution: &Resolution) -> Result<Deployment> {
        let profile = &self.profile;
        let mut subscription = Subscription::new(
            &profile.subscription,
            SubscriptionSpec {
                name: profile.package.clone(),
                source: resolution.catalog.clone(),
                source_namespace: profile.catalog_namespace.clone(),
                channel: resolution.channel.clone(),
                install_plan_approval: Some(profile.install_plan_approval.clone()),
                starting_csv: None,
            },
        );
        subscription.metadata.namespace = Some(profile.operator_namespace.clone());
        self.handle(subscription)?.create().await?;

        poll::sleep(profile.timings.deployment_creation_delay, &self.cancel).await?;
        let key = ObjectKey::namespaced(&profile.deployment, &profile.operator_namespace);
        wait::until_exists(
            self.api::<Deployment>(),
            &key,
            &profile.timings.deployment_created,
            &self.cancel,
        )
        .await
    }

    async fn evict_catalog_cache(&self) -> Result<()> {
        let profile = &self.profile;
        let namespace = profile.operator_namespace.as_str();

        let mut subscription =
            Subscription::new(&profile.subscription, SubscriptionSpec::default());
        subscription.metadata.namespace = Some(namespace.to_string());
        match self.handle(subscription)?.delete().await {
            Ok(_) | Err(Error::AlreadyAbsent { .. }) => {}
            Err(e) => return Err(e),
        }

        for csv in self.package_csvs().await? {
            let name = csv.metadata.name.clone().unwrap_or_default();
            match self.handle(csv)?.delete().await {
                Ok(_) | Err(Error::AlreadyAbsent { .. }) => {}
                Err(e) => return Err(e),
            }
            debug!(csv = %name, namespace, "deleted ClusterServiceVersion");
        }

        let eviction = &profile.cache_eviction;
        for selector in &eviction.selectors {
            self.api::<Pod>()
                .delete_collection(Some(&eviction.namespace), selector)
                .await
                .map_err(|e| {
                    Error::remote(Operation::DeleteCollection, Pod::kind_name(), selector, e)
                })?;
            info!(namespace = %eviction.namespace, %selector, "deleted OLM pods");
        }
        Ok(())
    }

    /// Resolves, installs and waits for the package's ClusterServiceVersion
    /// to succeed.
    #[instrument(level = "info", skip(self), fields(package = %self.profile.package))]
    pub async fn deploy(&self) -> Result<Outcome<Deployed>> {
        let mut resolution = match self.resolve().await? {
            Outcome::Ready(resolution) => resolution,
            Outcome::Skipped(reason) => return Ok(Outcome::Skipped(reason)),
        };
        let mut deployment = self.install(&mut resolution).await?;

        let timings = &self.profile.timings;
        if self.await_deployment_ready {
            deployment = wait::until_ready(
                self.api::<Deployment>(),
                &deployment.object_key(),
                &timings.deployment_ready,
                &self.cancel,
            )
            .await?;
        }

        let key = self.installed_csv(&[]).await?;
        let csv = wait::until_ready(
            self.api::<ClusterServiceVersion>(),
            &key,
            &timings.csv_succeeded,
            &self.cancel,
        )
        .await?;
        info!(csv = %key.name, "operator installed");
        Ok(Outcome::Ready(Deployed {
            resolution,
            deployment,
            csv,
        }))
    }

    /// The package's ClusterServiceVersions in the operator namespace.
    async fn package_csvs(&self) -> Result<Vec<ClusterServiceVersion>> {
        let profile = &self.profile;
        let namespace = profile.operator_namespace.as_str();
        let listed = self
            .api::<ClusterServiceVersion>()
            .list(Some(namespace), &Selector::new())
            .await
            .map_err(|e| {
                Error::remote(Operation::List, ClusterServiceVersion::kind_name(), namespace, e)
            })?;
        Ok(listed
            .into_iter()
            .filter(|csv| {
                csv.metadata
                    .name
                    .as_deref()
                    .map_or(false, |name| name.starts_with(&profile.csv_prefix))
            })
            .collect())
    }

    /// Waits for exactly one of the package's ClusterServiceVersions, other
    /// than those named in `superseded`, to show up.
    async fn installed_csv(&self, superseded: &[String]) -> Result<ObjectKey> {
        let profile = &self.profile;
        let namespace = profile.operator_namespace.as_str();
        let found = Mutex::new(None);
        let slot = &found;
        poll::poll_until(&profile.timings.csv_succeeded, &self.cancel, move || async move {
            let csvs = match self.package_csvs().await {
                Ok(csvs) => csvs,
                Err(e) => {
                    warn!(error = %e, "transient error while looking for the installed CSV");
                    return Ok(false);
                }
            };
            let mut names: Vec<String> = csvs
                .into_iter()
                .filter_map(|csv| csv.metadata.name)
                .filter(|name| !superseded.contains(name))
                .collect();
            match names.len() {
                0 => {
                    debug!(namespace, prefix = %profile.csv_prefix, "no CSV for the package yet");
                    Ok(false)
                }
                1 => {
                    *slot.lock().await = names.pop();
                    Ok(true)
                }
                count => Err(Error::AmbiguousInstall {
                    namespace: namespace.to_string(),
                    count,
                }),
            }
        })
        .await?;
        match found.into_inner() {
            Some(name) => Ok(ObjectKey::namespaced(name, namespace)),
            None => Err(Error::NotFound {
                kind: ClusterServiceVersion::kind_name(),
                key: ObjectKey::namespaced(format!("{}*", profile.csv_prefix), namespace),
            }),
        }
    }

    /// Moves the subscription to `channel` and waits for the
    /// ClusterServiceVersion it brings in to succeed.
    ///
    /// The CSVs of the package present before the switch are not considered,
    /// so a CSV still in phase `Replacing` does not make the result ambiguous.
    #[instrument(level = "info", skip(self), fields(package = %self.profile.package))]
    pub async fn upgrade(&self, channel: &str) -> Result<ClusterServiceVersion> {
        let profile = &self.profile;
        let key = ObjectKey::namespaced(&profile.subscription, &profile.operator_namespace);
        let store: Arc<dyn ObjectStore<Subscription>> = self.store.clone();
        let mut subscription = ResourceHandle::pull(store, key).await?;
        if subscription.definition().spec.channel.as_deref() == Some(channel) {
            return Err(Error::validation(
                Subscription::kind_name(),
                format!("{} already follows channel {}", profile.subscription, channel),
            ));
        }

        let superseded: Vec<String> = self
            .package_csvs()
            .await?
            .into_iter()
            .filter_map(|csv| csv.metadata.name)
            .collect();
        subscription.definition_mut().spec.channel = Some(channel.to_string());
        subscription.update(false).await?;
        info!(%channel, ?superseded, "moved subscription to new channel");

        poll::sleep(profile.timings.csv_upgrade_delay, &self.cancel).await?;
        let key = self.installed_csv(&superseded).await?;
        let csv = wait::until_ready(
            self.api::<ClusterServiceVersion>(),
            &key,
            &profile.timings.csv_succeeded,
            &self.cancel,
        )
        .await?;
        info!(csv = %key.name, %channel, "operator upgraded");
        Ok(csv)
    }

    /// Removes the operator: the `instance` of its policy resource if given
    /// (waiting for it to be gone), then its ClusterServiceVersions, the
    /// subscription, the OperatorGroup and the namespace.
    ///
    /// Objects that are already gone are skipped. A failed step does not stop
    /// the ones after it; the failures are returned together as
    /// [`Error::TeardownIncomplete`]. Only cancellation ends the teardown
    /// early.
    #[instrument(level = "info", skip(self), fields(package = %self.profile.package))]
    pub async fn teardown<K: ManagedKind>(&self, instance: Option<&ObjectKey>) -> Result<()>
    where
        S: ObjectStore<K>,
    {
        let profile = &self.profile;
        let namespace = profile.operator_namespace.as_str();
        let mut failures = Vec::new();

        if let Some(key) = instance {
            collect(self.remove_instance::<K>(key).await, &mut failures)?;
        }
        collect(self.remove_csvs().await, &mut failures)?;

        let subscription = ObjectKey::namespaced(&profile.subscription, namespace);
        collect(self.remove::<Subscription>(&subscription).await, &mut failures)?;
        let group = ObjectKey::namespaced(&profile.operator_group, namespace);
        collect(self.remove::<OperatorGroup>(&group).await, &mut failures)?;
        collect(self.remove::<Namespace>(&ObjectKey::cluster(namespace)).await, &mut failures)?;

        if failures.is_empty() {
            info!("operator removed");
            Ok(())
        } else {
            Err(Error::TeardownIncomplete {
                package: profile.package.clone(),
                failures,
            })
        }
    }

    async fn remove_instance<K: ManagedKind>(&self, key: &ObjectKey) -> Result<()>
    where
        S: ObjectStore<K>,
    {
        if self.remove::<K>(key).await? {
            let spec = &self.profile.timings.instance_deleted;
            wait::until_deleted(self.api::<K>(), key, spec, &self.cancel).await?;
        }
        Ok(())
    }

    async fn remove_csvs(&self) -> Result<()> {
        for csv in self.package_csvs().await? {
            self.remove::<ClusterServiceVersion>(&csv.object_key()).await?;
        }
        Ok(())
    }

    /// Deletes the object at `key`. Returns false when it was already gone.
    async fn remove<K: ManagedKind>(&self, key: &ObjectKey) -> Result<bool>
    where
        S: ObjectStore<K>,
    {
        match self.api::<K>().delete(key).await {
            Ok(()) => {
                info!(kind = %K::kind_name(), %key, "deleted object");
                Ok(true)
            }
            Err(e) if is_not_found(&e) => {
                debug!(kind = %K::kind_name(), %key, "object already gone");
                Ok(false)
            }
            Err(e) => Err(Error::remote(Operation::Delete, K::kind_name(), key, e)),
        }
    }
}

/// Records a failed teardown step. Cancellation is passed on instead.
fn collect<T>(step: Result<T>, failures: &mut Vec<Error>) -> Result<()> {
    match step {
        Ok(_) => Ok(()),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            warn!(error = %e, "teardown step failed");
            failures.push(e);
            Ok(())
        }
    }
}
