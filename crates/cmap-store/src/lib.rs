//! Backing-store abstraction for the channel-aware content map.
//!
//! The relational driver lives outside this workspace. This crate describes
//! what the content map needs from it: the three tables (`channel`,
//! `contentmap`, `contentattribute`) as typed rows, the mutations as typed
//! [`Statement`]s, and the filter language as an opaque [`Expression`] that
//! compiles to SQL text for cache keys.
//!
//! # Storage Backends
//!
//! All backends implement the [`Backend`] trait:
//!
//! - [`InMemoryBackend`] -- `BTreeMap`-based tables for tests and embedding
//!
//! # Design Rules
//!
//! 1. A statement group passed to [`Backend::execute`] is applied atomically.
//! 2. Attribute rows are always returned ordered by owner, name, sort order.
//! 3. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod expression;
pub mod memory;
pub mod row;
pub mod statement;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use expression::{CompiledQuery, Expression};
pub use memory::InMemoryBackend;
pub use row::{AttributeRow, BlobRef, ChannelRow, ContentRow, RowValue};
pub use statement::{Statement, StatementKind};
pub use traits::Backend;
