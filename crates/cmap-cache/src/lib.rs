//! Multi-region cache for the channel-aware content map.
//!
//! Every region is keyed by a channel-unaware *group* (the datasource
//! identity) plus a region-specific key, and each entry is a small sorted
//! [`ArrayMap`] from channel id to payload. Contention is therefore per
//! logical key, never per region.
//!
//! # Regions
//!
//! - objects by internal id
//! - internal ids by content id
//! - internal ids by channelset id
//! - attribute bags by channelset id (one or more named regions)
//! - query results and counts
//! - blob file names by directory and digest
//!
//! # Failure model
//!
//! The cache is an optimization only. [`CacheService`] never returns an
//! error: internal failures are logged and degrade to a miss or a no-op.

pub mod array_map;
pub mod error;
pub mod region;
pub mod service;
pub mod value;

pub use array_map::ArrayMap;
pub use error::{CacheError, CacheResult};
pub use region::Region;
pub use service::{AttributeCachePolicy, CacheService, CacheStats, QueryKey, DEFAULT_ATTRIBUTE_REGION};
pub use value::{AttributeBag, CachedAttribute};
