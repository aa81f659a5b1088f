//! Attribute kinds, values and schema metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content_id::ContentId;
use crate::ObjectType;

/// The declared data kind of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Short text, capped at the configured length.
    Text,
    /// Unbounded text.
    LongText,
    /// Raw bytes.
    Binary,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    /// Floating point number.
    Double,
    /// Point in time (UTC).
    Date,
    /// Reference to another object, stored as its content id.
    Link,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::LongText => "long_text",
            Self::Binary => "binary",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Double => "double",
            Self::Date => "date",
            Self::Link => "link",
        };
        f.write_str(name)
    }
}

/// A typed attribute value as held in memory.
///
/// Values handed in by callers need not match the declared kind of the
/// attribute; the write path coerces them before they are persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    Binary(Vec<u8>),
    Integer(i32),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
    Link(ContentId),
}

impl AttributeValue {
    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Integer(_) => "integer",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Date(_) => "date",
            Self::Link(_) => "link",
        }
    }

    /// The text of a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The target of a `Link` value.
    pub fn as_link(&self) -> Option<ContentId> {
        match self {
            Self::Link(id) => Some(*id),
            _ => None,
        }
    }

    /// The number of an `Integer` value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::Link(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<ContentId> for AttributeValue {
    fn from(value: ContentId) -> Self {
        Self::Link(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

/// Where the values of an attribute physically live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageClass {
    /// A dedicated column on the primary object row.
    Optimized,
    /// Rows in the vertical attribute table.
    Generic,
    /// Generic rows holding a digest and path; bytes live in blob files.
    Filesystem,
    /// Computed from other objects linking back to the owner. Never stored.
    ForeignLink,
}

/// Schema metadata for one attribute of one object type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeType {
    pub name: String,
    pub object_type: ObjectType,
    pub kind: AttributeKind,
    pub multivalue: bool,
    pub optimized: bool,
    pub filesystem: bool,
    /// Column on the primary row holding an optimized attribute.
    pub quick_column: Option<String>,
    /// Object type a link attribute points to.
    pub linked_object_type: Option<ObjectType>,
    /// For foreign link attributes: the attribute on the linking objects.
    pub foreign_link_attribute: Option<String>,
}

impl AttributeType {
    /// A single-valued generic attribute.
    pub fn new(object_type: ObjectType, name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            object_type,
            kind,
            multivalue: false,
            optimized: false,
            filesystem: false,
            quick_column: None,
            linked_object_type: None,
            foreign_link_attribute: None,
        }
    }

    /// Allow an ordered list of values.
    pub fn multivalue(mut self) -> Self {
        self.multivalue = true;
        self
    }

    /// Store the attribute as a `quick_<name>` column on the primary row.
    pub fn optimized(mut self) -> Self {
        self.optimized = true;
        self.quick_column = Some(format!("quick_{}", self.name));
        self
    }

    /// Store values in blob files instead of attribute rows.
    pub fn filesystem(mut self) -> Self {
        self.filesystem = true;
        self
    }

    /// Values link to objects of `object_type`.
    pub fn linking(mut self, object_type: ObjectType) -> Self {
        self.linked_object_type = Some(object_type);
        self
    }

    /// Turn this into a foreign link: objects of `object_type` whose
    /// attribute `attribute` links back to the owner.
    pub fn foreign(mut self, object_type: ObjectType, attribute: impl Into<String>) -> Self {
        self.linked_object_type = Some(object_type);
        self.foreign_link_attribute = Some(attribute.into());
        self.multivalue = true;
        self
    }

    /// Storage class derived from the flags. Foreign links win over
    /// everything else, then filesystem, then optimized.
    pub fn storage_class(&self) -> StorageClass {
        if self.foreign_link_attribute.is_some() {
            StorageClass::ForeignLink
        } else if self.filesystem {
            StorageClass::Filesystem
        } else if self.optimized && !self.multivalue && self.quick_column.is_some() {
            StorageClass::Optimized
        } else {
            StorageClass::Generic
        }
    }
}
