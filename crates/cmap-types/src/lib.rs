//! Foundation types for the channel-aware content map.
//!
//! This crate provides the identity, value and schema types shared by every
//! other `cmap-*` crate.
//!
//! # Key Types
//!
//! - [`ContentId`] — Channel-independent external identifier (`"type.id"`)
//! - [`AttributeKind`] — Closed set of attribute data kinds
//! - [`AttributeValue`] — A typed attribute value held in memory
//! - [`AttributeType`] — Schema metadata for one attribute
//! - [`Schema`] — All attribute types, partitioned by storage class

pub mod attribute;
pub mod content_id;
pub mod error;
pub mod schema;

pub use attribute::{AttributeKind, AttributeType, AttributeValue, StorageClass};
pub use content_id::ContentId;
pub use error::TypeError;
pub use schema::Schema;

/// Identifier of a channel. `0` is the synthetic root and is never persisted.
pub type ChannelId = i32;

/// Identifier grouping all channel variants of one logical object.
pub type ChannelsetId = i32;

/// Primary key of a stored object row.
///
/// Positive values are persisted rows, `0` means existence is not yet
/// resolved and negative values mean resolution found no variant.
pub type InternalId = i64;

/// Numeric object type (the first half of a [`ContentId`]).
pub type ObjectType = i32;
