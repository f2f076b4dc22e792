//! Seeds definitions from a ClusterServiceVersion's `alm-examples`.
//!
//! Operators ship a JSON array of example objects for the kinds they own in
//! the `alm-examples` annotation of their CSV. These functions pick an element
//! out of that array; nothing here talks to the cluster.

use std::borrow::Cow;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::kind::ManagedKind;

/// The CSV annotation holding the example objects.
pub const ALM_EXAMPLES_ANNOTATION: &str = "alm-examples";

/// Errors from reading an `alm-examples` blob.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    /// The blob is empty.
    #[error("alm-examples is an empty string")]
    Empty,
    /// The blob is not a JSON array.
    #[error("alm-examples is not a JSON array: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The array has no element at the requested index.
    #[error("no alm-examples item exists at index {0}")]
    IndexOutOfBounds(usize),
    /// The array is empty.
    #[error("alm-examples has no items")]
    NoElements,
    /// No element has the requested kind.
    #[error("no alm-examples item found for kind {0}")]
    KindNotFound(String),
    /// The element for a kind does not decode into that kind.
    #[error("alm-examples item for kind {kind} is not a valid {kind}: {source}")]
    Decode {
        /// The kind looked up.
        kind: String,
        /// The decode failure.
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Discriminator<'a> {
    #[serde(default, borrow)]
    kind: Option<Cow<'a, str>>,
}

/// Returns every element of the array, in order.
pub fn all(blob: &str) -> Result<Vec<Box<RawValue>>, ExtractError> {
    if blob.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    serde_json::from_str(blob).map_err(ExtractError::Malformed)
}

/// Returns the element at `index`.
pub fn by_index(blob: &str, index: usize) -> Result<Box<RawValue>, ExtractError> {
    all(blob)?
        .into_iter()
        .nth(index)
        .ok_or(ExtractError::IndexOutOfBounds(index))
}

/// Returns the first element whose `kind` is `kind`.
///
/// Only the `kind` field of each element is decoded while searching.
pub fn by_kind(blob: &str, kind: &str) -> Result<Box<RawValue>, ExtractError> {
    let items = all(blob)?;
    if items.is_empty() {
        return Err(ExtractError::NoElements);
    }
    items
        .into_iter()
        .find(|item| {
            serde_json::from_str::<Discriminator<'_>>(item.get())
                .map(|d| d.kind.as_deref() == Some(kind))
                .unwrap_or(false)
        })
        .ok_or_else(|| ExtractError::KindNotFound(kind.to_string()))
}

/// Decodes the first element of kind `K` into a definition.
pub fn seed<K: ManagedKind>(blob: &str) -> Result<K, ExtractError> {
    let kind = K::kind_name();
    let raw = by_kind(blob, &kind)?;
    serde_json::from_str(raw.get()).map_err(|source| ExtractError::Decode { kind, source })
}
