//! The cache service shared by a datasource and its helpers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cmap_store::{CompiledQuery, ContentRow};
use cmap_types::{ChannelId, ChannelsetId, ContentId, InternalId};

use crate::error::{CacheError, CacheResult};
use crate::region::Region;
use crate::value::{AttributeBag, CachedAttribute};

/// Region used for attributes without an explicit policy.
pub const DEFAULT_ATTRIBUTE_REGION: &str = "attributes";

/// Channel key for regions that are not channel-specific.
const NO_CHANNEL: ChannelId = 0;

/// Per-attribute caching policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeCachePolicy {
    /// Never cache this attribute.
    Disabled,
    /// Cache this attribute in a dedicated region.
    Region(String),
}

/// Key of a cached query result or count.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey {
    channels: Vec<ChannelId>,
    sql: String,
    params: Vec<String>,
    start: usize,
    limit: Option<usize>,
}

impl QueryKey {
    pub fn new(
        channels: &[ChannelId],
        query: &CompiledQuery,
        start: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            channels: channels.to_vec(),
            sql: query.sql.clone(),
            params: query
                .params
                .iter()
                .map(|p| format!("{}:{}", p.column(), p))
                .collect(),
            start,
            limit,
        }
    }
}

/// Hit and miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// All cache regions of the content map.
///
/// Lookups on a disabled cache always miss and stores are dropped.
/// Invalidation works regardless so that re-enabling never serves stale data
/// written while disabled.
pub struct CacheService {
    enabled: AtomicBool,
    policies: HashMap<String, AttributeCachePolicy>,
    objects: Region<InternalId, Arc<ContentRow>>,
    content_ids: Region<ContentId, InternalId>,
    channelsets: Region<ChannelsetId, InternalId>,
    attributes: RwLock<BTreeMap<String, Arc<Region<ChannelsetId, AttributeBag>>>>,
    results: Region<QueryKey, Arc<Vec<ContentRow>>>,
    counts: Region<QueryKey, usize>,
    files: Region<String, PathBuf>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("enabled", &self.is_enabled())
            .field("policies", &self.policies)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CacheService {
    /// A cache service with the default attribute policy for every region.
    pub fn new(enabled: bool) -> Self {
        Self::with_policies(enabled, HashMap::new())
    }

    /// Create a cache with per-attribute policies keyed by attribute name.
    pub fn with_policies(enabled: bool, policies: HashMap<String, AttributeCachePolicy>) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            policies,
            objects: Region::new("objects"),
            content_ids: Region::new("content_ids"),
            channelsets: Region::new("channelsets"),
            attributes: RwLock::new(BTreeMap::new()),
            results: Region::new("results"),
            counts: Region::new("counts"),
            files: Region::new("files"),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Whether lookups and stores take effect.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn the whole service on or off. Disabling does not clear entries.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        debug!(enabled, "cache toggled");
    }

    /// Hit and miss counters since creation.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn swallow<T: Default>(&self, operation: &str, result: CacheResult<T>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(operation, error = %e, "cache failure ignored");
                T::default()
            }
        }
    }

    fn lookup<T>(&self, operation: &str, result: CacheResult<Option<T>>) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }
        let found = self.swallow(operation, result);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    // -------------------------------------------------------------------------
    // Objects and identity maps
    // -------------------------------------------------------------------------

    /// Cached primary row by internal id.
    pub fn object(&self, group: &str, id: InternalId) -> Option<Arc<ContentRow>> {
        if !self.is_enabled() {
            return None;
        }
        self.lookup("object", self.objects.get_any(group, &id))
    }

    /// Cache a primary row under its internal id and channel.
    pub fn put_object(&self, group: &str, row: Arc<ContentRow>) {
        if !self.is_enabled() || row.id <= 0 {
            return;
        }
        let result = self.objects.put(group, row.id, row.channel_id, row);
        self.swallow("put_object", result);
    }

    /// Internal id a content id resolved to for a selected channel.
    pub fn content_id(&self, group: &str, content_id: &ContentId, channel: ChannelId) -> Option<InternalId> {
        if !self.is_enabled() {
            return None;
        }
        self.lookup("content_id", self.content_ids.get(group, content_id, channel))
    }

    /// Remember which internal id a content id resolved to in `channel`.
    pub fn put_content_id(&self, group: &str, content_id: ContentId, channel: ChannelId, id: InternalId) {
        if !self.is_enabled() || id <= 0 {
            return;
        }
        let result = self.content_ids.put(group, content_id, channel, id);
        self.swallow("put_content_id", result);
    }

    /// Internal id a channelset resolved to for a selected channel.
    pub fn channelset(&self, group: &str, channelset: ChannelsetId, channel: ChannelId) -> Option<InternalId> {
        if !self.is_enabled() {
            return None;
        }
        self.lookup("channelset", self.channelsets.get(group, &channelset, channel))
    }

    /// Remember which internal id a channelset resolved to in `channel`.
    pub fn put_channelset(&self, group: &str, channelset: ChannelsetId, channel: ChannelId, id: InternalId) {
        if !self.is_enabled() || id <= 0 {
            return;
        }
        let result = self.channelsets.put(group, channelset, channel, id);
        self.swallow("put_channelset", result);
    }

    /// Forget a content id mapping for one selected channel, or for all.
    pub fn invalidate_content_id(&self, group: &str, content_id: &ContentId, channel: Option<ChannelId>) {
        let result = self.content_ids.remove(group, content_id, channel);
        self.swallow("invalidate_content_id", result);
    }

    /// Forget an object row and its id mappings. Attribute bags are left
    /// alone; see [`invalidate_attribute`](Self::invalidate_attribute).
    ///
    /// With `all_channels` the id maps are dropped for every selected
    /// channel; otherwise only for the object's own channel.
    pub fn invalidate_object(&self, group: &str, row: &ContentRow, all_channels: bool) {
        let channel = (!all_channels).then_some(row.channel_id);
        let results = [
            self.objects.remove(group, &row.id, None),
            self.content_ids.remove(group, &row.content_id, channel),
            self.channelsets.remove(group, &row.channelset_id, channel),
        ];
        for result in results {
            self.swallow("invalidate_object", result);
        }
        debug!(group, id = row.id, content_id = %row.content_id, all_channels, "object invalidated");
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    /// Whether values of this attribute are cached at all.
    pub fn caches_attribute(&self, name: &str) -> bool {
        !matches!(self.policies.get(name), Some(AttributeCachePolicy::Disabled))
    }

    fn attribute_region(&self, name: &str) -> CacheResult<Option<Arc<Region<ChannelsetId, AttributeBag>>>> {
        let region = match self.policies.get(name) {
            Some(AttributeCachePolicy::Disabled) => return Ok(None),
            Some(AttributeCachePolicy::Region(region)) => region.as_str(),
            None => DEFAULT_ATTRIBUTE_REGION,
        };
        let poisoned = || CacheError::Poisoned {
            region: region.to_string(),
        };
        if let Some(found) = self.attributes.read().map_err(|_| poisoned())?.get(region) {
            return Ok(Some(found.clone()));
        }
        let mut regions = self.attributes.write().map_err(|_| poisoned())?;
        Ok(Some(
            regions
                .entry(region.to_string())
                .or_insert_with(|| Arc::new(Region::new(region)))
                .clone(),
        ))
    }

    fn all_attribute_regions(&self) -> CacheResult<Vec<Arc<Region<ChannelsetId, AttributeBag>>>> {
        let regions = self.attributes.read().map_err(|_| CacheError::Poisoned {
            region: DEFAULT_ATTRIBUTE_REGION.to_string(),
        })?;
        Ok(regions.values().cloned().collect())
    }

    /// Cached value of one attribute of one object variant.
    ///
    /// `Some(CachedAttribute::Null)` means the attribute is known to be empty.
    pub fn attribute(
        &self,
        group: &str,
        name: &str,
        channelset: ChannelsetId,
        channel: ChannelId,
    ) -> Option<CachedAttribute> {
        if !self.is_enabled() {
            return None;
        }
        let found = self.attribute_region(name).and_then(|region| match region {
            Some(region) => Ok(region
                .get(group, &channelset, channel)?
                .and_then(|bag| bag.get(name).cloned())),
            None => Ok(None),
        });
        self.lookup("attribute", found)
    }

    /// Cache the values of one attribute of one object variant.
    pub fn put_attribute(
        &self,
        group: &str,
        name: &str,
        channelset: ChannelsetId,
        channel: ChannelId,
        value: CachedAttribute,
    ) {
        if !self.is_enabled() {
            return;
        }
        let result = self.attribute_region(name).and_then(|region| match region {
            Some(region) => region.update(group, channelset, channel, |bag| bag.insert(name, value)),
            None => Ok(()),
        });
        self.swallow("put_attribute", result);
    }

    /// Forget one attribute of one object variant.
    pub fn invalidate_attribute(&self, group: &str, name: &str, channelset: ChannelsetId, channel: ChannelId) {
        let result = self.attribute_region(name).and_then(|region| match region {
            Some(region) => region
                .update_existing(group, &channelset, channel, |bag| {
                    bag.remove(name);
                })
                .map(drop),
            None => Ok(()),
        });
        self.swallow("invalidate_attribute", result);
    }

    /// Drop every cached attribute of a channelset, for one channel or all.
    pub fn invalidate_attributes(&self, group: &str, channelset: ChannelsetId, channel: Option<ChannelId>) {
        let result = self.all_attribute_regions().and_then(|regions| {
            regions
                .iter()
                .try_for_each(|region| region.remove(group, &channelset, channel))
        });
        self.swallow("invalidate_attributes", result);
    }

    // -------------------------------------------------------------------------
    // Query results
    // -------------------------------------------------------------------------

    /// Cached rows of a query, if any.
    pub fn results(&self, group: &str, key: &QueryKey) -> Option<Arc<Vec<ContentRow>>> {
        if !self.is_enabled() {
            return None;
        }
        self.lookup("results", self.results.get(group, key, NO_CHANNEL))
    }

    /// Cache the rows of a query.
    pub fn put_results(&self, group: &str, key: QueryKey, rows: Arc<Vec<ContentRow>>) {
        if !self.is_enabled() {
            return;
        }
        let result = self.results.put(group, key, NO_CHANNEL, rows);
        self.swallow("put_results", result);
    }

    /// Cached row count of a query, if any.
    pub fn count(&self, group: &str, key: &QueryKey) -> Option<usize> {
        if !self.is_enabled() {
            return None;
        }
        self.lookup("count", self.counts.get(group, key, NO_CHANNEL))
    }

    /// Cache the row count of a query.
    pub fn put_count(&self, group: &str, key: QueryKey, count: usize) {
        if !self.is_enabled() {
            return;
        }
        let result = self.counts.put(group, key, NO_CHANNEL, count);
        self.swallow("put_count", result);
    }

    /// Drop all cached query results and counts of a datasource.
    pub fn clear_results(&self, group: &str) {
        let results = [self.results.clear_group(group), self.counts.clear_group(group)];
        for result in results {
            self.swallow("clear_results", result);
        }
    }

    // -------------------------------------------------------------------------
    // Blob file names
    // -------------------------------------------------------------------------

    /// Cached file name for a digest prefix (`{digest}.{length}`) in a directory.
    pub fn file(&self, dir: &Path, prefix: &str) -> Option<PathBuf> {
        if !self.is_enabled() {
            return None;
        }
        let group = dir.to_string_lossy();
        self.lookup("file", self.files.get(&group, &prefix.to_string(), NO_CHANNEL))
    }

    /// Remember the blob file found for a digest prefix in `dir`.
    pub fn put_file(&self, dir: &Path, prefix: &str, path: PathBuf) {
        if !self.is_enabled() {
            return;
        }
        let group = dir.to_string_lossy();
        let result = self.files.put(&group, prefix.to_string(), NO_CHANNEL, path);
        self.swallow("put_file", result);
    }

    /// Forget the blob file cached for a digest prefix.
    pub fn invalidate_file(&self, dir: &Path, prefix: &str) {
        let group = dir.to_string_lossy();
        let result = self.files.remove(&group, &prefix.to_string(), None);
        self.swallow("invalidate_file", result);
    }

    // -------------------------------------------------------------------------
    // Whole-cache operations
    // -------------------------------------------------------------------------

    /// Drop everything cached for one datasource.
    pub fn clear_group(&self, group: &str) {
        let mut results = vec![
            self.objects.clear_group(group),
            self.content_ids.clear_group(group),
            self.channelsets.clear_group(group),
            self.results.clear_group(group),
            self.counts.clear_group(group),
        ];
        match self.all_attribute_regions() {
            Ok(regions) => results.extend(regions.iter().map(|r| r.clear_group(group))),
            Err(e) => results.push(Err(e)),
        }
        for result in results {
            self.swallow("clear_group", result);
        }
        debug!(group, "cache group cleared");
    }

    /// Drop every entry of every region.
    pub fn clear_all(&self) {
        let mut results = vec![
            self.objects.clear(),
            self.content_ids.clear(),
            self.channelsets.clear(),
            self.results.clear(),
            self.counts.clear(),
            self.files.clear(),
        ];
        match self.all_attribute_regions() {
            Ok(regions) => results.extend(regions.iter().map(|r| r.clear())),
            Err(e) => results.push(Err(e)),
        }
        for result in results {
            self.swallow("clear_all", result);
        }
        debug!("cache cleared");
    }

    /// Names of the attribute regions created so far.
    pub fn attribute_regions(&self) -> Vec<String> {
        let result = self
            .attributes
            .read()
            .map(|regions| regions.keys().cloned().collect())
            .map_err(|_| CacheError::Poisoned {
                region: DEFAULT_ATTRIBUTE_REGION.to_string(),
            });
        self.swallow("attribute_regions", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmap_store::{Expression, RowValue};
    use cmap_types::AttributeValue;

    fn row(id: InternalId, channel: ChannelId, channelset: ChannelsetId) -> ContentRow {
        let mut row = ContentRow::new(ContentId::new(1, id * 10), channel, channelset);
        row.id = id;
        row
    }

    // =========================================================================
    // Objects and identity maps
    // =========================================================================

    #[test]
    fn object_round_trip() {
        let cache = CacheService::default();
        cache.put_object("db", Arc::new(row(5, 1, 5)));
        assert_eq!(cache.object("db", 5).map(|r| r.id), Some(5));
        assert!(cache.object("other", 5).is_none());
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn unresolved_ids_are_not_cached() {
        let cache = CacheService::default();
        cache.put_content_id("db", ContentId::new(1, 1), 1, -1);
        cache.put_channelset("db", 4, 1, 0);
        assert!(cache.content_id("db", &ContentId::new(1, 1), 1).is_none());
        assert!(cache.channelset("db", 4, 1).is_none());
    }

    #[test]
    fn content_ids_are_per_selected_channel() {
        let cache = CacheService::default();
        let cid = ContentId::new(1, 200);
        cache.put_content_id("db", cid, 1, 7);
        cache.put_content_id("db", cid, 2, 8);
        assert_eq!(cache.content_id("db", &cid, 1), Some(7));
        assert_eq!(cache.content_id("db", &cid, 2), Some(8));
        cache.invalidate_content_id("db", &cid, Some(2));
        assert_eq!(cache.content_id("db", &cid, 1), Some(7));
        assert_eq!(cache.content_id("db", &cid, 2), None);
    }

    #[test]
    fn invalidate_object_scope() {
        let cache = CacheService::default();
        let r = row(3, 1, 42);
        cache.put_object("db", Arc::new(r.clone()));
        cache.put_content_id("db", r.content_id, 1, 3);
        cache.put_content_id("db", r.content_id, 2, 3);
        cache.put_channelset("db", 42, 1, 3);
        cache.put_channelset("db", 42, 2, 3);

        cache.invalidate_object("db", &r, false);
        assert!(cache.object("db", 3).is_none());
        assert!(cache.content_id("db", &r.content_id, 1).is_none());
        assert_eq!(cache.content_id("db", &r.content_id, 2), Some(3));
        assert_eq!(cache.channelset("db", 42, 2), Some(3));

        cache.invalidate_object("db", &r, true);
        assert!(cache.content_id("db", &r.content_id, 2).is_none());
        assert!(cache.channelset("db", 42, 2).is_none());
    }

    #[test]
    fn disabled_cache_always_misses() {
        let cache = CacheService::new(false);
        cache.put_object("db", Arc::new(row(1, 1, 1)));
        assert!(cache.object("db", 1).is_none());
        cache.set_enabled(true);
        assert!(cache.object("db", 1).is_none());
        cache.put_object("db", Arc::new(row(1, 1, 1)));
        assert!(cache.object("db", 1).is_some());
        cache.set_enabled(false);
        assert!(cache.object("db", 1).is_none());
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    #[test]
    fn null_is_distinct_from_miss() {
        let cache = CacheService::default();
        assert_eq!(cache.attribute("db", "title", 42, 1), None);
        cache.put_attribute("db", "title", 42, 1, CachedAttribute::Null);
        assert_eq!(cache.attribute("db", "title", 42, 1), Some(CachedAttribute::Null));
        assert_eq!(cache.attribute("db", "title", 42, 2), None);
    }

    #[test]
    fn attribute_invalidation() {
        let cache = CacheService::default();
        let value = CachedAttribute::from_values(vec![AttributeValue::from("x")]);
        cache.put_attribute("db", "title", 42, 1, value.clone());
        cache.put_attribute("db", "body", 42, 1, value.clone());
        cache.put_attribute("db", "title", 42, 2, value.clone());

        cache.invalidate_attribute("db", "title", 42, 1);
        assert_eq!(cache.attribute("db", "title", 42, 1), None);
        assert_eq!(cache.attribute("db", "body", 42, 1), Some(value.clone()));
        assert_eq!(cache.attribute("db", "title", 42, 2), Some(value.clone()));

        cache.invalidate_attributes("db", 42, None);
        assert_eq!(cache.attribute("db", "title", 42, 2), None);
    }

    #[test]
    fn attribute_policies() {
        let policies = HashMap::from([
            ("body".to_string(), AttributeCachePolicy::Disabled),
            ("image".to_string(), AttributeCachePolicy::Region("blobs".to_string())),
        ]);
        let cache = CacheService::with_policies(true, policies);
        let value = CachedAttribute::from_values(vec![AttributeValue::from("x")]);

        cache.put_attribute("db", "body", 1, 1, value.clone());
        assert!(!cache.caches_attribute("body"));
        assert_eq!(cache.attribute("db", "body", 1, 1), None);

        cache.put_attribute("db", "image", 1, 1, value.clone());
        cache.put_attribute("db", "title", 1, 1, value.clone());
        assert_eq!(cache.attribute("db", "image", 1, 1), Some(value));
        assert_eq!(
            cache.attribute_regions(),
            vec!["attributes".to_string(), "blobs".to_string()]
        );
    }

    #[test]
    fn policy_deserializes_from_config_shapes() {
        let disabled: AttributeCachePolicy = serde_json::from_str("\"disabled\"").unwrap();
        assert_eq!(disabled, AttributeCachePolicy::Disabled);
        let region: AttributeCachePolicy = serde_json::from_str(r#"{"region":"big"}"#).unwrap();
        assert_eq!(region, AttributeCachePolicy::Region("big".into()));
    }

    // =========================================================================
    // Results and files
    // =========================================================================

    #[test]
    fn results_keyed_by_query_and_channels() {
        let cache = CacheService::default();
        let query = Expression::ColumnEquals {
            column: "quick_title".into(),
            value: RowValue::Text("a".into()),
        }
        .to_sql();
        let key = QueryKey::new(&[1, 2], &query, 0, None);
        cache.put_results("db", key.clone(), Arc::new(vec![row(1, 1, 1)]));
        cache.put_count("db", key.clone(), 1);

        assert_eq!(cache.results("db", &key).map(|r| r.len()), Some(1));
        assert!(cache.results("db", &QueryKey::new(&[1], &query, 0, None)).is_none());
        assert_eq!(cache.count("db", &key), Some(1));

        cache.clear_results("db");
        assert!(cache.results("db", &key).is_none());
        assert!(cache.count("db", &key).is_none());
    }

    #[test]
    fn query_key_distinguishes_param_types() {
        let text = Expression::ColumnEquals {
            column: "c".into(),
            value: RowValue::Text("1".into()),
        }
        .to_sql();
        let int = Expression::ColumnEquals {
            column: "c".into(),
            value: RowValue::Int(1),
        }
        .to_sql();
        assert_ne!(QueryKey::new(&[], &text, 0, None), QueryKey::new(&[], &int, 0, None));
    }

    #[test]
    fn file_names() {
        let cache = CacheService::default();
        let dir = Path::new("/blobs/ab/cd");
        cache.put_file(dir, "abcd.3", dir.join("abcd.3.1.5.image.0"));
        assert_eq!(cache.file(dir, "abcd.3"), Some(dir.join("abcd.3.1.5.image.0")));
        cache.invalidate_file(dir, "abcd.3");
        assert_eq!(cache.file(dir, "abcd.3"), None);
    }

    #[test]
    fn clear_all_empties_every_region() {
        let cache = CacheService::default();
        cache.put_object("db", Arc::new(row(1, 1, 1)));
        cache.put_attribute("db", "t", 1, 1, CachedAttribute::Null);
        cache.put_file(Path::new("/x"), "p", PathBuf::from("/x/p"));
        cache.clear_all();
        assert!(cache.object("db", 1).is_none());
        assert!(cache.attribute("db", "t", 1, 1).is_none());
        assert!(cache.file(Path::new("/x"), "p").is_none());
    }

    #[test]
    fn clear_group_leaves_other_groups() {
        let cache = CacheService::default();
        cache.put_object("a", Arc::new(row(1, 1, 1)));
        cache.put_object("b", Arc::new(row(1, 1, 1)));
        cache.clear_group("a");
        assert!(cache.object("a", 1).is_none());
        assert!(cache.object("b", 1).is_some());
    }
}
