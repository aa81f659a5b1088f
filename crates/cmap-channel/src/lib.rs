//! Channel tree management for the content map.
//!
//! Channels form a forest of inheritance contexts. Each channel carries
//! Modified Preorder Tree Traversal boundaries (`left`, `right`) so that
//! ancestor tests need no recursion: `a` is an ancestor of `b` iff
//! `a.left < b.left && b.right < a.right`.
//!
//! # Key Types
//!
//! - [`Channel`] -- One node: id, name and MPTT boundaries
//! - [`ChannelTree`] -- Arena-backed forest under a synthetic root (id `0`)
//!
//! # Invariants
//!
//! - The synthetic root is never persisted.
//! - Boundaries are renumbered after every structural change.
//! - Saving rejects the whole tree if any id is duplicated or non-positive.

pub mod error;
pub mod tree;

pub use error::{ChannelError, ChannelResult};
pub use tree::{Channel, ChannelTree, ROOT_CHANNEL};
