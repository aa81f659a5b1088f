//! Diff engine for content map writes.
//!
//! Compares a snapshot of persisted attribute rows with the values an object
//! carries now and produces the minimal set of insert, update and delete
//! statements, grouped in a [`StatementBatch`] so many objects' changes can
//! be executed together.
//!
//! # Key Types
//!
//! - [`AttributeDiff`] / [`AttributeChange`] -- per-position diff of one generic attribute
//! - [`diff_columns`] -- changed optimized columns of a primary row
//! - [`StatementBatch`] -- statements grouped by kind plus deferred blob removals

pub mod attribute_diff;
pub mod batch;
pub mod column_diff;
pub mod error;

pub use attribute_diff::{diff_attribute, AttributeChange, AttributeDiff};
pub use batch::StatementBatch;
pub use column_diff::diff_columns;
pub use error::{DiffError, DiffResult};
