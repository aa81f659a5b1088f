use std::fmt;

use cmap_blob::BlobError;
use cmap_channel::ChannelError;
use cmap_diff::DiffError;
use cmap_store::StoreError;
use cmap_types::{AttributeKind, ChannelId, TypeError};

/// Errors surfaced by the datasource.
#[derive(Debug, thiserror::Error)]
pub enum DatasourceError {
    /// A channel id has no match in the channel tree.
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    /// No variant of the object exists in any selected channel.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Insert of an object that is already persisted.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// The backing store failed.
    #[error("store error while {operation} {object}: {source}")]
    Store {
        operation: &'static str,
        object: String,
        #[source]
        source: StoreError,
    },

    /// A value cannot be coerced to the attribute's declared kind.
    #[error("cannot store {value} in {attribute} ({kind})")]
    Coercion {
        attribute: String,
        kind: AttributeKind,
        value: String,
    },

    /// Schema lookup or content id parsing failed.
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("invalid channel tree: {0}")]
    InvalidTree(ChannelError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("invalid attribute snapshot: {0}")]
    Diff(#[from] DiffError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

impl From<ChannelError> for DatasourceError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::UnknownChannel(id) => Self::UnknownChannel(id),
            ChannelError::Store(source) => Self::Store {
                operation: "saving",
                object: "channel tree".to_string(),
                source,
            },
            other => Self::InvalidTree(other),
        }
    }
}

/// Attach operation and object context to store failures.
pub(crate) trait StoreContext<T> {
    fn during(self, operation: &'static str, object: impl fmt::Display) -> DatasourceResult<T>;
}

impl<T> StoreContext<T> for Result<T, StoreError> {
    fn during(self, operation: &'static str, object: impl fmt::Display) -> DatasourceResult<T> {
        self.map_err(|source| DatasourceError::Store {
            operation,
            object: object.to_string(),
            source,
        })
    }
}

/// Convenience alias for datasource results.
pub type DatasourceResult<T> = Result<T, DatasourceError>;
