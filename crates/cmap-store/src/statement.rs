//! Typed mutations against the backing tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cmap_types::{ChannelId, ContentId, InternalId};

use crate::row::{ChannelRow, RowValue};

/// The three statement shapes a batch groups by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
}

/// A single mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Update the primary row. `columns` holds only changed optimized
    /// columns; `None` sets the column to NULL.
    UpdateContent {
        id: InternalId,
        content_id: ContentId,
        update_timestamp: i64,
        columns: BTreeMap<String, Option<RowValue>>,
    },
    DeleteContent {
        id: InternalId,
    },
    InsertAttribute {
        map_id: InternalId,
        name: String,
        sort_order: i32,
        value: RowValue,
    },
    UpdateAttribute {
        map_id: InternalId,
        name: String,
        sort_order: i32,
        value: RowValue,
    },
    DeleteAttribute {
        map_id: InternalId,
        name: String,
        sort_order: i32,
    },
    /// Remove every attribute row of an object.
    DeleteAllAttributes {
        map_id: InternalId,
    },
    UpsertChannel(ChannelRow),
    DeleteChannel {
        id: ChannelId,
    },
}

impl Statement {
    /// Which execution group the statement belongs to.
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::InsertAttribute { .. } => StatementKind::Insert,
            Self::UpdateContent { .. } | Self::UpdateAttribute { .. } | Self::UpsertChannel(_) => {
                StatementKind::Update
            }
            Self::DeleteContent { .. }
            | Self::DeleteAttribute { .. }
            | Self::DeleteAllAttributes { .. }
            | Self::DeleteChannel { .. } => StatementKind::Delete,
        }
    }

    /// Attribute name touched by a generic attribute statement.
    pub fn attribute_name(&self) -> Option<&str> {
        match self {
            Self::InsertAttribute { name, .. }
            | Self::UpdateAttribute { name, .. }
            | Self::DeleteAttribute { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_kinds() {
        let insert = Statement::InsertAttribute {
            map_id: 1,
            name: "a".into(),
            sort_order: 0,
            value: RowValue::Int(1),
        };
        assert_eq!(insert.kind(), StatementKind::Insert);
        assert_eq!(insert.attribute_name(), Some("a"));
        assert_eq!(Statement::DeleteContent { id: 1 }.kind(), StatementKind::Delete);
        assert_eq!(Statement::DeleteContent { id: 1 }.attribute_name(), None);
        assert_eq!(
            Statement::UpsertChannel(ChannelRow::new(1, "x", 1, 2)).kind(),
            StatementKind::Update
        );
    }
}
