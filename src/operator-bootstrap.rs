use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use converge::bootstrap::{CatalogBootstrap, Outcome};
use converge::config::{OperatorOpts, Opts};
use converge::kinds::gpu::ClusterPolicy;
use converge::kinds::network::NicClusterPolicy;
use converge::kinds::nfd::NodeFeatureDiscovery;
use converge::{KubeStore, ManagedKind, PollSpec, Readiness, ResourceHandle};
use kube::Resource;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit status of a run where the package was unavailable and nothing was
/// installed.
const EXIT_SKIPPED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let opts = Opts::from_args_and_env();
    match run(opts).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_SKIPPED),
        Err(e) => {
            error!(error = ?e, "operator bootstrap failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns false when the bootstrap was skipped.
async fn run(opts: Opts) -> anyhow::Result<bool> {
    // Read the environment. Note that this tries a KubeConfig file first, then
    // falls back on an in-cluster configuration.
    let client = kube::Client::try_default()
        .await
        .context("failed to acquire Kubernetes client")?;
    let store = Arc::new(KubeStore::new(client));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling bootstrap");
            shutdown.cancel();
        }
    });

    let profile = opts.profile();
    let bootstrap =
        CatalogBootstrap::new(store.clone(), profile).with_cancellation(cancel.clone());
    let deployed = match bootstrap.deploy().await? {
        Outcome::Ready(deployed) => deployed,
        Outcome::Skipped(reason) => {
            warn!(%reason, "operator bootstrap skipped");
            return Ok(false);
        }
    };
    if opts.skip_policy {
        info!("operator installed, not creating its policy");
    }
    let alm_examples = || {
        deployed
            .alm_examples()
            .context("installed ClusterServiceVersion carries no alm-examples")
    };

    match &opts.operator {
        OperatorOpts::Gpu {
            gpu_direct_rdma, ..
        } => {
            let policy = if opts.skip_policy {
                None
            } else {
                let mut policy =
                    ResourceHandle::<ClusterPolicy>::from_alm_examples(store, alm_examples()?)?;
                if *gpu_direct_rdma {
                    policy.definition_mut().set_gpu_direct_rdma(true);
                }
                Some(policy)
            };
            lifecycle(&bootstrap, policy, &opts.operator, &cancel).await?;
        }
        OperatorOpts::Network {
            ofed_repository,
            ofed_driver_version,
            ..
        } => {
            let policy = if opts.skip_policy {
                None
            } else {
                let mut policy =
                    ResourceHandle::<NicClusterPolicy>::from_alm_examples(store, alm_examples()?)?;
                if ofed_repository.is_some() || ofed_driver_version.is_some() {
                    let driver = policy
                        .definition_mut()
                        .spec
                        .ofed_driver
                        .get_or_insert_with(Default::default);
                    if let Some(repository) = ofed_repository {
                        driver.repository = repository.clone();
                    }
                    if let Some(version) = ofed_driver_version {
                        driver.version = version.clone();
                    }
                }
                Some(policy)
            };
            lifecycle(&bootstrap, policy, &opts.operator, &cancel).await?;
        }
        OperatorOpts::Nfd {
            pci_device_classes,
            pci_label_fields,
            ..
        } => {
            let instance = if opts.skip_policy {
                None
            } else {
                let mut instance = ResourceHandle::<NodeFeatureDiscovery>::from_alm_examples(
                    store,
                    alm_examples()?,
                )?;
                if !pci_device_classes.is_empty() || !pci_label_fields.is_empty() {
                    let classes: Vec<&str> =
                        pci_device_classes.iter().map(String::as_str).collect();
                    let fields: Vec<&str> = pci_label_fields.iter().map(String::as_str).collect();
                    instance
                        .definition_mut()
                        .update_pci_devices(&classes, &fields)?;
                }
                Some(instance)
            };
            lifecycle(&bootstrap, instance, &opts.operator, &cancel).await?;
        }
    }
    Ok(true)
}

/// Creates the policy, then upgrades and tears down the operator when asked
/// to.
async fn lifecycle<K: ManagedKind + Readiness>(
    bootstrap: &CatalogBootstrap<KubeStore>,
    mut policy: Option<ResourceHandle<K>>,
    operator: &OperatorOpts,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let ready = bootstrap.profile().timings.policy_ready;
    if let Some(policy) = policy.as_mut() {
        apply(policy, &ready, cancel).await?;
    }

    if let Some(channel) = operator.upgrade_to_channel() {
        let before = policy
            .as_ref()
            .and_then(|p| p.observed())
            .and_then(|p| p.meta().resource_version.clone());
        let csv = bootstrap
            .upgrade(channel)
            .await
            .with_context(|| format!("failed to upgrade operator to channel {}", channel))?;
        info!(csv = ?csv.metadata.name, %channel, "operator upgraded");
        if let (Some(policy), Some(version)) = (policy.as_mut(), before) {
            let key = policy.key();
            policy
                .wait_ready_since(&version, &ready, cancel)
                .await
                .with_context(|| {
                    format!("{} {} was not reconciled after the upgrade", K::kind_name(), key)
                })?;
            info!(kind = %K::kind_name(), %key, "policy reconciled after upgrade");
        }
    }

    if operator.cleanup() {
        let instance = policy.as_ref().map(|p| p.key());
        bootstrap
            .teardown::<K>(instance.as_ref())
            .await
            .context("failed to remove the operator")?;
    }
    Ok(())
}

async fn apply<K: ManagedKind + Readiness>(
    policy: &mut ResourceHandle<K>,
    ready: &PollSpec,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let key = policy.key();
    policy.create().await?;
    policy
        .wait_ready(ready, cancel)
        .await
        .with_context(|| format!("{} {} did not become ready", K::kind_name(), key))?;
    info!(kind = %K::kind_name(), %key, "policy is ready");
    Ok(())
}
