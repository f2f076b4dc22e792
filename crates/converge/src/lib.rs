//! A crate for driving OLM-managed operators and their custom resources on a
//! Kubernetes cluster from sequential code.
//!
//! The crate provides the generic [`ResourceHandle`] for the lifecycle of a
//! single remote object, the [`alm`] extractor for seeding definitions from a
//! ClusterServiceVersion's `alm-examples`, the bounded [`poll`] helpers and the
//! [`bootstrap`] workflow that brings up an operator from a default or
//! fallback catalog.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use converge::kinds::network::NicClusterPolicy;
//! use converge::{KubeStore, PollSpec, ResourceHandle};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = kube::Client::try_default().await?;
//!     let store = Arc::new(KubeStore::new(client));
//!     let alm_examples = std::fs::read_to_string("alm-examples.json")?;
//!
//!     let mut policy =
//!         ResourceHandle::<NicClusterPolicy>::from_alm_examples(store, &alm_examples)?;
//!     policy.create().await?;
//!     let spec = PollSpec::new(Duration::from_secs(60), Duration::from_secs(12 * 60));
//!     policy.wait_ready(&spec, &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(feature = "docs", feature(doc_cfg))]

pub mod alm;
pub mod bootstrap;
pub mod config;
mod error;
mod handle;
pub mod kind;
pub mod kinds;
pub mod poll;
pub mod store;
pub mod wait;

#[doc(inline)]
pub use error::{is_not_found, Error, Operation, Result};
#[doc(inline)]
pub use handle::ResourceHandle;
#[doc(inline)]
pub use kind::{ManagedKind, ObjectKey, Readiness};
#[doc(inline)]
pub use poll::{poll_until, PollSpec};
#[doc(inline)]
pub use store::{KubeStore, ObjectStore, Selector};
