//! Filesystem storage for filesystem-backed attributes.
//!
//! Generic attribute rows of a filesystem-backed attribute hold only a
//! [`BlobRef`](cmap_store::BlobRef): digest, length and relative path. The
//! bytes live under the configured base directory as
//!
//! ```text
//! {digest[0:2]}/{digest[2:4]}/{digest}.{length}.{objType}.{internalId}.{attribute}.{sortOrder}
//! ```
//!
//! Files with equal digest and length are deduplicated with hard links.
//! Removals are deferred until the surrounding write commits.

pub mod digest;
pub mod error;
pub mod store;

pub use digest::{blob_digest, BlobDigest};
pub use error::{BlobError, BlobResult};
pub use store::{BlobStore, BlobTarget};
