//! Per-position diff of one generic attribute.
//!
//! Old values come from persisted `contentattribute` rows, new values from
//! the object being written. Position `i` of the new list is compared with
//! the row at sort order `i`.

use std::collections::BTreeMap;

use cmap_store::{AttributeRow, BlobRef, RowValue, Statement};
use cmap_types::InternalId;

use crate::batch::StatementBatch;
use crate::error::{DiffError, DiffResult};

/// The result of comparing one attribute's persisted rows with new values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeDiff {
    pub map_id: InternalId,
    pub name: String,
    pub changes: Vec<AttributeChange>,
}

/// A single positional change.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeChange {
    /// No row at this position yet.
    Insert { sort_order: i32, value: RowValue },
    /// The row at this position holds a different value.
    Update {
        sort_order: i32,
        old: RowValue,
        new: RowValue,
    },
    /// The row at this position has no new value.
    Delete { sort_order: i32, old: RowValue },
}

impl AttributeChange {
    /// Position the change applies to.
    pub fn sort_order(&self) -> i32 {
        match self {
            Self::Insert { sort_order, .. }
            | Self::Update { sort_order, .. }
            | Self::Delete { sort_order, .. } => *sort_order,
        }
    }

    /// Blob file orphaned by this change, if any.
    pub fn released_blob(&self) -> Option<&BlobRef> {
        match self {
            Self::Update {
                old: RowValue::File(old),
                new,
                ..
            } => match new {
                RowValue::File(new) if new.path == old.path => None,
                _ => Some(old),
            },
            Self::Delete {
                old: RowValue::File(old),
                ..
            } => Some(old),
            _ => None,
        }
    }
}

impl AttributeDiff {
    /// Returns `true` if the attribute is unchanged.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Number of positions added.
    pub fn insertions(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, AttributeChange::Insert { .. }))
            .count()
    }

    /// Number of positions rewritten.
    pub fn updates(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, AttributeChange::Update { .. }))
            .count()
    }

    /// Number of positions removed.
    pub fn deletions(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, AttributeChange::Delete { .. }))
            .count()
    }

    /// Statements realizing this diff.
    pub fn statements(&self) -> Vec<Statement> {
        self.changes
            .iter()
            .map(|change| match change {
                AttributeChange::Insert { sort_order, value } => Statement::InsertAttribute {
                    map_id: self.map_id,
                    name: self.name.clone(),
                    sort_order: *sort_order,
                    value: value.clone(),
                },
                AttributeChange::Update {
                    sort_order, new, ..
                } => Statement::UpdateAttribute {
                    map_id: self.map_id,
                    name: self.name.clone(),
                    sort_order: *sort_order,
                    value: new.clone(),
                },
                AttributeChange::Delete { sort_order, .. } => Statement::DeleteAttribute {
                    map_id: self.map_id,
                    name: self.name.clone(),
                    sort_order: *sort_order,
                },
            })
            .collect()
    }

    /// Move the statements and orphaned blobs into a batch.
    pub fn push_into(&self, batch: &mut StatementBatch) {
        for change in &self.changes {
            if let Some(blob) = change.released_blob() {
                batch.remove_blob(blob.clone());
            }
        }
        batch.extend(self.statements());
    }
}

/// Compute the diff between persisted rows and new values of one attribute.
///
/// For each position: a new value without a row is an insert, a row with a
/// different new value is an update, a row without a new value is a delete,
/// and equal values produce nothing.
pub fn diff_attribute(
    map_id: InternalId,
    name: &str,
    old: &[AttributeRow],
    new: &[RowValue],
) -> DiffResult<AttributeDiff> {
    let mut by_position: BTreeMap<i32, &RowValue> = BTreeMap::new();
    for row in old {
        if row.map_id != map_id || row.name != name {
            return Err(DiffError::ForeignRow {
                map_id,
                name: name.to_string(),
                row_map_id: row.map_id,
                row_name: row.name.clone(),
            });
        }
        if by_position.insert(row.sort_order, &row.value).is_some() {
            return Err(DiffError::DuplicatePosition {
                map_id,
                name: name.to_string(),
                sort_order: row.sort_order,
            });
        }
    }

    let mut changes = Vec::new();
    for (i, value) in new.iter().enumerate() {
        let sort_order = i as i32;
        match by_position.remove(&sort_order) {
            None => changes.push(AttributeChange::Insert {
                sort_order,
                value: value.clone(),
            }),
            Some(old) if old != value => changes.push(AttributeChange::Update {
                sort_order,
                old: old.clone(),
                new: value.clone(),
            }),
            Some(_) => {}
        }
    }
    // Rows beyond the new length, or at positions outside 0..len.
    for (sort_order, old) in by_position {
        changes.push(AttributeChange::Delete {
            sort_order,
            old: old.clone(),
        });
    }

    Ok(AttributeDiff {
        map_id,
        name: name.to_string(),
        changes,
    })
}
