//! Typed rows of the three backing tables.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cmap_types::{ChannelId, ChannelsetId, ContentId, InternalId, ObjectType};

/// A row of the `channel` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRow {
    pub id: ChannelId,
    pub name: String,
    pub left: i32,
    pub right: i32,
}

impl ChannelRow {
    /// A channel row with its MPTT boundaries.
    pub fn new(id: ChannelId, name: impl Into<String>, left: i32, right: i32) -> Self {
        Self {
            id,
            name: name.into(),
            left,
            right,
        }
    }
}

/// Reference to a blob file backing a filesystem attribute value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    /// Hex content digest.
    pub digest: String,
    /// Length of the content in bytes.
    pub length: u64,
    /// Path of the blob file relative to the blob store base path.
    pub path: String,
}

/// One typed column value.
///
/// `contentattribute` has one column per storage type; a row fills exactly
/// one of them. Optimized columns on `contentmap` use the same type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "column", content = "value", rename_all = "snake_case")]
pub enum RowValue {
    /// `value_text`
    Text(String),
    /// `value_clob`
    Clob(String),
    /// `value_blob`
    Blob(Vec<u8>),
    /// `value_int`
    Int(i32),
    /// `value_long`
    Long(i64),
    /// `value_double`
    Double(f64),
    /// `value_date`
    Date(DateTime<Utc>),
    /// Digest, length and path of a blob file.
    File(BlobRef),
}

impl RowValue {
    /// Name of the physical column this value lives in.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Text(_) => "value_text",
            Self::Clob(_) => "value_clob",
            Self::Blob(_) => "value_blob",
            Self::Int(_) => "value_int",
            Self::Long(_) => "value_long",
            Self::Double(_) => "value_double",
            Self::Date(_) => "value_date",
            Self::File(_) => "value_text",
        }
    }
}

impl fmt::Display for RowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) | Self::Clob(s) => write!(f, "{s:?}"),
            Self::Blob(b) => write!(f, "blob:{}", b.len()),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Double(v) => write!(f, "{v}D"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::File(r) => write!(f, "file:{}.{}", r.digest, r.length),
        }
    }
}

/// A row of the `contentmap` table, including its optimized columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentRow {
    pub id: InternalId,
    pub channel_id: ChannelId,
    pub channelset_id: ChannelsetId,
    pub content_id: ContentId,
    pub update_timestamp: i64,
    /// Optimized attribute columns by column name. Absent means NULL.
    pub columns: BTreeMap<String, RowValue>,
}

impl ContentRow {
    /// A not-yet-inserted row.
    pub fn new(content_id: ContentId, channel_id: ChannelId, channelset_id: ChannelsetId) -> Self {
        Self {
            id: 0,
            channel_id,
            channelset_id,
            content_id,
            update_timestamp: 0,
            columns: BTreeMap::new(),
        }
    }

    /// Object type half of the content id.
    pub fn obj_type(&self) -> ObjectType {
        self.content_id.obj_type()
    }

    pub fn obj_id(&self) -> i64 {
        self.content_id.obj_id()
    }

    /// Set an optimized column value.
    pub fn with_column(mut self, column: impl Into<String>, value: RowValue) -> Self {
        self.columns.insert(column.into(), value);
        self
    }
}

/// A row of the `contentattribute` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeRow {
    pub id: i64,
    /// Owning `contentmap` row.
    pub map_id: InternalId,
    pub name: String,
    pub sort_order: i32,
    pub value: RowValue,
    pub update_timestamp: i64,
}
