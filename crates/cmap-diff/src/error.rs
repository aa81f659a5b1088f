//! Error types for the diff crate.

use cmap_types::InternalId;

/// Errors that can occur while diffing attribute snapshots.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DiffError {
    /// The snapshot holds two rows for the same position.
    #[error("duplicate attribute row {name}[{sort_order}] for object {map_id}")]
    DuplicatePosition {
        map_id: InternalId,
        name: String,
        sort_order: i32,
    },

    /// A snapshot row belongs to another object or attribute.
    #[error("attribute row {row_name} of object {row_map_id} passed as {name} of object {map_id}")]
    ForeignRow {
        map_id: InternalId,
        name: String,
        row_map_id: InternalId,
        row_name: String,
    },
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
