//! Channel-aware content object datasource.
//!
//! Provides the unified API over channels, identity resolution, attribute
//! loading and writes. This is the main entry point for applications
//! embedding the content map.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cmap_datasource::{ChannelContext, Datasource, DatasourceConfig};
//! use cmap_store::InMemoryBackend;
//! use cmap_types::{ContentId, Schema};
//!
//! let backend = Arc::new(InMemoryBackend::new("content"));
//! let ds = Datasource::new(backend, Schema::default(), DatasourceConfig::default())?;
//! let ctx = ChannelContext::new([2]);
//! let page = ds.load(&ctx, ContentId::new(10002, 7))?;
//! # Ok::<(), cmap_datasource::DatasourceError>(())
//! ```

pub mod config;
pub mod context;
pub mod datasource;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod object;
pub mod query;
pub mod refresh;
pub mod resolve;
pub mod write;

pub use config::{CacheWarmingConfig, DatasourceConfig, PrefetchConfig, SyncCheckingConfig};
pub use context::{ChannelContext, ChannelScope};
pub use datasource::Datasource;
pub use error::{DatasourceError, DatasourceResult};
pub use loader::PrefetchReport;
pub use normalize::Normalizer;
pub use object::{ContentObject, MISSING};
pub use query::Paging;
pub use refresh::RefreshOutcome;

// Re-export key types
pub use cmap_channel::{ChannelTree, ROOT_CHANNEL};
pub use cmap_diff::StatementBatch;
pub use cmap_store::{Backend, Expression};
pub use cmap_types::{AttributeKind, AttributeType, AttributeValue, ContentId, Schema};
