use std::fmt;
use std::time::Duration;

use crate::alm::ExtractError;
use crate::kind::ObjectKey;

/// A convenience alias for results returned by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The remote verb that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// A single object read.
    Get,
    /// A list by selector.
    List,
    /// Object creation.
    Create,
    /// A full replace of an existing object.
    Update,
    /// Deletion of a single object.
    Delete,
    /// Deletion of every object matching a selector.
    DeleteCollection,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Operation::Get => "get",
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::DeleteCollection => "delete collection of",
        };
        f.write_str(verb)
    }
}

/// Describes an error that occurred while managing cluster objects.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The definition handed to a handle is not usable. Nothing was sent to
    /// the cluster.
    #[error("invalid {kind}: {reason}")]
    Validation {
        /// The resource kind.
        kind: String,
        /// What is wrong with the definition.
        reason: String,
    },
    /// The object does not exist on the cluster.
    #[error("{kind} {key} does not exist")]
    NotFound {
        /// The resource kind.
        kind: String,
        /// The object that was looked up.
        key: ObjectKey,
    },
    /// A delete was requested for an object that is not on the cluster.
    #[error("{kind} {key} cannot be deleted because it does not exist")]
    AlreadyAbsent {
        /// The resource kind.
        kind: String,
        /// The object that was to be deleted.
        key: ObjectKey,
    },
    /// The API server returned an error that is not interpreted any further.
    #[error("failed to {op} {kind} {target}: {source}")]
    Remote {
        /// The failed verb.
        op: Operation,
        /// The resource kind.
        kind: String,
        /// The object key, or the selector for list style calls.
        target: String,
        /// The underlying client error.
        #[source]
        source: kube::Error,
    },
    /// The `alm-examples` blob did not yield a definition.
    #[error(transparent)]
    Extract(#[from] ExtractError),
    /// A wait gave up before its condition was met.
    #[error("condition not met after {after:?}")]
    Timeout {
        /// The configured timeout.
        after: Duration,
    },
    /// A wait was cancelled by its caller.
    #[error("wait was cancelled")]
    Cancelled,
    /// More than one package manifest matched a package in a catalog.
    #[error("found {count} package manifests for {package} in catalog {catalog}, expected one")]
    AmbiguousPackage {
        /// The package name.
        package: String,
        /// The catalog the lookup was scoped to.
        catalog: String,
        /// How many manifests matched.
        count: usize,
    },
    /// More than one installed ClusterServiceVersion was found where one was
    /// expected.
    #[error("found {count} ClusterServiceVersions in namespace {namespace}, expected one")]
    AmbiguousInstall {
        /// The operator namespace.
        namespace: String,
        /// How many were found.
        count: usize,
    },
    /// The operator deployment never showed up, even after evicting the
    /// catalog cache and retrying.
    #[error("operator for package {package} was not deployed after recovery: {source}")]
    BootstrapExhausted {
        /// The package being installed.
        package: String,
        /// The failure of the retried install.
        #[source]
        source: Box<Error>,
    },
    /// Some teardown steps failed. The steps after them still ran.
    #[error("teardown of {package} failed in {} step(s): {}", .failures.len(), join(.failures))]
    TeardownIncomplete {
        /// The package being removed.
        package: String,
        /// One error per failed step, in the order the steps ran.
        failures: Vec<Error>,
    },
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub(crate) fn remote(
        op: Operation,
        kind: impl Into<String>,
        target: impl ToString,
        source: kube::Error,
    ) -> Self {
        Error::Remote {
            op,
            kind: kind.into(),
            target: target.to_string(),
            source,
        }
    }

    pub(crate) fn validation(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

/// Returns true if the client error is the API server reporting a missing
/// object.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}
