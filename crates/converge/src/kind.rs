//! The traits a resource kind implements to be managed by a
//! [`ResourceHandle`](crate::ResourceHandle).

use std::fmt;

use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

/// A Kubernetes resource kind that can be managed through a
/// [`ResourceHandle`](crate::ResourceHandle).
///
/// Implementing this once per kind is all that is needed: validation, the
/// lifecycle operations and logging are shared.
pub trait ManagedKind:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Whether objects of this kind live in a namespace.
    const NAMESPACED: bool;

    /// The kind name, e.g. `CatalogSource`.
    fn kind_name() -> String {
        Self::kind(&()).into_owned()
    }

    /// The identity of this object.
    fn object_key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
        }
    }
}

/// A kind that reports when it has converged.
pub trait Readiness {
    /// Returns true once the object's status says it is ready.
    fn is_ready(&self) -> bool;
}

/// The name and, for namespaced kinds, namespace of an object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// The object name.
    pub name: String,
    /// The namespace, `None` for cluster scoped objects.
    pub namespace: Option<String>,
}

impl ObjectKey {
    /// A key for a namespaced object.
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        ObjectKey {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// A key for a cluster scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        ObjectKey {
            name: name.into(),
            namespace: None,
        }
    }

    /// The namespace as a string slice.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Checks the key against the scope of `K`.
    pub fn validate<K: ManagedKind>(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::validation(K::kind_name(), "name is empty"));
        }
        match (K::NAMESPACED, self.namespace()) {
            (true, None) | (true, Some("")) => Err(Error::validation(
                K::kind_name(),
                format!("{} is namespaced but no namespace was given", self.name),
            )),
            (false, Some(ns)) if !ns.is_empty() => Err(Error::validation(
                K::kind_name(),
                format!("{} is cluster scoped but has namespace {}", self.name, ns),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}
