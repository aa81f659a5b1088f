use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cmap_cache::AttributeCachePolicy;
use cmap_store::Expression;

use crate::error::{DatasourceError, DatasourceResult};

/// Configuration of one datasource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasourceConfig {
    /// Master switch for every cache region.
    pub cache_enabled: bool,
    /// Per-attribute cache overrides by attribute name.
    pub attribute_cache: HashMap<String, AttributeCachePolicy>,
    pub sync_checking: SyncCheckingConfig,
    pub cache_warming: CacheWarmingConfig,
    pub prefetch: PrefetchConfig,
    /// Root directory of filesystem-backed attribute files.
    pub filesystem_base_path: Option<PathBuf>,
    /// Objects per bulk-load statement.
    pub batch_size: usize,
    /// Maximum length of short text values; longer values are truncated.
    pub text_length_cap: usize,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            attribute_cache: HashMap::new(),
            sync_checking: SyncCheckingConfig::default(),
            cache_warming: CacheWarmingConfig::default(),
            prefetch: PrefetchConfig::default(),
            filesystem_base_path: None,
            batch_size: 100,
            text_length_cap: 255,
        }
    }
}

/// Detection of changes made to the store by other writers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCheckingConfig {
    pub enabled: bool,
    /// Refresh only objects modified since the last check instead of
    /// clearing the whole cache.
    pub differential: bool,
}

impl Default for SyncCheckingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            differential: true,
        }
    }
}

/// Proactive loading of attributes into the cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheWarmingConfig {
    /// Warm the cache when the datasource is created.
    pub on_init: bool,
    /// Objects to keep warm. Without a filter nothing is warmed.
    pub filter: Option<Expression>,
    /// Attributes loaded for every warmed object.
    pub attributes: Vec<String>,
}

/// Cache-versus-bulk-load heuristics of the batch loader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub enabled: bool,
    /// Below this many objects the cache is checked before bulk loading.
    pub threshold: usize,
    /// Bulk load once more than this many cache misses occur.
    pub cache_miss_threshold: usize,
    /// Bulk load once more than this percentage of lookups miss.
    pub cache_miss_percentage: u8,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1000,
            cache_miss_threshold: 100,
            cache_miss_percentage: 20,
        }
    }
}

impl PrefetchConfig {
    /// Whether `misses` out of `total` lookups stay under both thresholds.
    pub fn misses_tolerable(&self, misses: usize, total: usize) -> bool {
        misses <= self.cache_miss_threshold
            && misses * 100 <= usize::from(self.cache_miss_percentage) * total
    }
}

impl DatasourceConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> DatasourceResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| DatasourceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> DatasourceResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DatasourceError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the datasource cannot run with.
    pub fn validate(&self) -> DatasourceResult<()> {
        if self.batch_size == 0 {
            return Err(DatasourceError::Config("batch_size must be positive".into()));
        }
        if self.prefetch.cache_miss_percentage > 100 {
            return Err(DatasourceError::Config(format!(
                "prefetch.cache_miss_percentage {} exceeds 100",
                self.prefetch.cache_miss_percentage
            )));
        }
        if self.text_length_cap == 0 {
            return Err(DatasourceError::Config("text_length_cap must be positive".into()));
        }
        Ok(())
    }
}
