use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use cmap_blob::BlobStore;
use cmap_cache::CacheService;
use cmap_channel::{ChannelResult, ChannelTree};
use cmap_store::Backend;
use cmap_types::{AttributeType, ObjectType, Schema};

use crate::config::DatasourceConfig;
use crate::context::{ChannelContext, ChannelScope};
use crate::error::{DatasourceError, DatasourceResult, StoreContext};
use crate::normalize::Normalizer;

/// A channel-aware content object datasource.
///
/// Owns the channel tree of its backend and a handle to a cache service.
/// All lookups take an explicit [`ChannelContext`]; the datasource itself
/// holds no per-caller state and can be shared across threads.
pub struct Datasource {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) config: DatasourceConfig,
    pub(crate) cache: Arc<CacheService>,
    pub(crate) blobs: Option<BlobStore>,
    pub(crate) normalizer: Normalizer,
    tree: RwLock<ChannelTree>,
    /// Serializes statement execution with its blob removals.
    commit_lock: Mutex<()>,
    pub(crate) last_seen: AtomicI64,
}

impl std::fmt::Debug for Datasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datasource")
            .field("identity", &self.identity())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Datasource {
    /// Open a datasource with its own cache service.
    pub fn new(
        backend: Arc<dyn Backend>,
        schema: Schema,
        config: DatasourceConfig,
    ) -> DatasourceResult<Self> {
        let cache = Arc::new(CacheService::with_policies(
            config.cache_enabled,
            config.attribute_cache.clone(),
        ));
        Self::with_cache(backend, schema, config, cache)
    }

    /// Open a datasource on an injected cache service.
    pub fn with_cache(
        backend: Arc<dyn Backend>,
        schema: Schema,
        config: DatasourceConfig,
        cache: Arc<CacheService>,
    ) -> DatasourceResult<Self> {
        config.validate()?;
        let tree = ChannelTree::load(backend.as_ref())?;
        let last_seen = backend
            .last_update()
            .during("reading last update of", backend.identity())?;
        let blobs = config
            .filesystem_base_path
            .as_ref()
            .map(|base| BlobStore::new(base.clone(), cache.clone()));

        let datasource = Self {
            normalizer: Normalizer::new(config.text_length_cap),
            backend,
            schema: Arc::new(schema),
            config,
            cache,
            blobs,
            tree: RwLock::new(tree),
            commit_lock: Mutex::new(()),
            last_seen: AtomicI64::new(last_seen),
        };
        info!(
            identity = datasource.identity(),
            cache = datasource.cache.is_enabled(),
            "datasource opened"
        );

        if datasource.config.cache_warming.on_init {
            if let Err(e) = datasource.warm_cache() {
                warn!(error = %e, "cache warming on init failed");
            }
        }
        Ok(datasource)
    }

    /// Channel-unaware identity, used as cache group.
    pub fn identity(&self) -> &str {
        self.backend.identity()
    }

    /// Attribute types of every object type.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &DatasourceConfig {
        &self.config
    }

    /// The cache service. Shared with the blob store.
    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// The backing store.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // ---------------------------------------------------------------
    // Channels
    // ---------------------------------------------------------------

    pub(crate) fn read_tree(&self) -> DatasourceResult<RwLockReadGuard<'_, ChannelTree>> {
        self.tree
            .read()
            .map_err(|_| DatasourceError::Poisoned("channel tree"))
    }

    fn write_tree(&self) -> DatasourceResult<RwLockWriteGuard<'_, ChannelTree>> {
        self.tree
            .write()
            .map_err(|_| DatasourceError::Poisoned("channel tree"))
    }

    /// Resolve a context against the current channel tree.
    pub fn scope(&self, ctx: &ChannelContext) -> DatasourceResult<ChannelScope> {
        ctx.scope(&*self.read_tree()?)
    }

    /// A snapshot of the channel tree.
    pub fn channel_tree(&self) -> DatasourceResult<ChannelTree> {
        Ok(self.read_tree()?.clone())
    }

    /// Edit the channel tree and persist it. Nothing is written and the
    /// loaded tree is kept if the edit or the save fails.
    pub fn update_channels(
        &self,
        edit: impl FnOnce(&mut ChannelTree) -> ChannelResult<()>,
    ) -> DatasourceResult<usize> {
        let mut tree = self.channel_tree()?;
        edit(&mut tree)?;
        let written = tree.save(self.backend.as_ref())?;
        *self.write_tree()? = tree;
        // Resolutions depend on channel paths.
        self.cache.clear_group(self.identity());
        Ok(written)
    }

    /// Re-read the channel tree from the store.
    pub fn reload_channels(&self) -> DatasourceResult<()> {
        let tree = ChannelTree::load(self.backend.as_ref())?;
        *self.write_tree()? = tree;
        self.cache.clear_group(self.identity());
        Ok(())
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Clear and disable the cache service.
    pub fn shutdown(&self) {
        self.cache.clear_all();
        self.cache.set_enabled(false);
        info!(identity = self.identity(), "datasource shut down");
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    pub(crate) fn attribute_type(&self, object_type: ObjectType, name: &str) -> DatasourceResult<&AttributeType> {
        Ok(self.schema.attribute(object_type, name)?)
    }

    pub(crate) fn lock_commits(&self) -> DatasourceResult<MutexGuard<'_, ()>> {
        self.commit_lock
            .lock()
            .map_err(|_| DatasourceError::Poisoned("commit"))
    }

    pub(crate) fn blob_store(&self) -> DatasourceResult<&BlobStore> {
        self.blobs.as_ref().ok_or_else(|| {
            DatasourceError::Config("filesystem attributes require filesystem_base_path".into())
        })
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
