//! The resource kinds this crate knows how to manage.
//!
//! Operator owned kinds keep any field they do not model in an `extra` map so
//! that a definition seeded from `alm-examples` survives a round trip.

pub mod core;
pub mod gpu;
pub mod machine;
pub mod network;
pub mod nfd;
pub mod olm;

/// The value custom resources of NVIDIA operators report once reconciled.
pub(crate) const STATE_READY: &str = "ready";
