//! Named cache regions.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use cmap_types::ChannelId;

use crate::array_map::ArrayMap;
use crate::error::{CacheError, CacheResult};

/// One cache entry: payloads of a single logical key, by channel.
pub type Entry<V> = RwLock<ArrayMap<ChannelId, V>>;

/// A region maps `group -> key -> channel -> value`.
///
/// The region lock only guards entry creation and removal; reads and
/// writes of payloads lock the entry alone.
pub struct Region<K, V> {
    name: String,
    groups: RwLock<HashMap<String, HashMap<K, Arc<Entry<V>>>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Region<K, V> {
    /// An empty region. `name` shows up in errors and logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn poisoned<T>(&self, _: T) -> CacheError {
        CacheError::Poisoned {
            region: self.name.clone(),
        }
    }

    /// The entry for a key, if one exists.
    pub fn entry(&self, group: &str, key: &K) -> CacheResult<Option<Arc<Entry<V>>>> {
        let groups = self.groups.read().map_err(|e| self.poisoned(e))?;
        Ok(groups.get(group).and_then(|g| g.get(key)).cloned())
    }

    /// The entry for a key, created empty if needed.
    pub fn entry_or_insert(&self, group: &str, key: K) -> CacheResult<Arc<Entry<V>>> {
        if let Some(entry) = self.entry(group, &key)? {
            return Ok(entry);
        }
        let mut groups = self.groups.write().map_err(|e| self.poisoned(e))?;
        Ok(groups
            .entry(group.to_string())
            .or_default()
            .entry(key)
            .or_default()
            .clone())
    }

    /// Value cached for one channel.
    pub fn get(&self, group: &str, key: &K, channel: ChannelId) -> CacheResult<Option<V>> {
        let Some(entry) = self.entry(group, key)? else {
            return Ok(None);
        };
        let map = entry.read().map_err(|e| self.poisoned(e))?;
        Ok(map.get(channel).cloned())
    }

    /// Any cached value for the key, lowest channel first.
    pub fn get_any(&self, group: &str, key: &K) -> CacheResult<Option<V>> {
        let Some(entry) = self.entry(group, key)? else {
            return Ok(None);
        };
        let map = entry.read().map_err(|e| self.poisoned(e))?;
        let found = map.values().next().cloned();
        Ok(found)
    }

    /// Store the value for one channel, creating the entry if needed.
    pub fn put(&self, group: &str, key: K, channel: ChannelId, value: V) -> CacheResult<()> {
        let entry = self.entry_or_insert(group, key)?;
        let mut map = entry.write().map_err(|e| self.poisoned(e))?;
        map.insert(channel, value);
        Ok(())
    }

    /// Mutate the value for one channel in place, creating it if absent.
    pub fn update<R>(
        &self,
        group: &str,
        key: K,
        channel: ChannelId,
        f: impl FnOnce(&mut V) -> R,
    ) -> CacheResult<R>
    where
        V: Default,
    {
        let entry = self.entry_or_insert(group, key)?;
        let mut map = entry.write().map_err(|e| self.poisoned(e))?;
        Ok(f(map.get_or_insert_with(channel, V::default)))
    }

    /// Mutate the value for one channel in place only if it exists.
    pub fn update_existing<R>(
        &self,
        group: &str,
        key: &K,
        channel: ChannelId,
        f: impl FnOnce(&mut V) -> R,
    ) -> CacheResult<Option<R>> {
        let Some(entry) = self.entry(group, key)? else {
            return Ok(None);
        };
        let mut map = entry.write().map_err(|e| self.poisoned(e))?;
        Ok(map.get_mut(channel).map(f))
    }

    /// Drop one channel's value, or the whole entry when `channel` is `None`.
    pub fn remove(&self, group: &str, key: &K, channel: Option<ChannelId>) -> CacheResult<()> {
        match channel {
            Some(channel) => {
                let Some(entry) = self.entry(group, key)? else {
                    return Ok(());
                };
                let emptied = {
                    let mut map = entry.write().map_err(|e| self.poisoned(e))?;
                    map.remove(channel);
                    map.is_empty()
                };
                if emptied {
                    self.prune(group, std::slice::from_ref(key))?;
                }
            }
            None => {
                let mut groups = self.groups.write().map_err(|e| self.poisoned(e))?;
                if let Some(g) = groups.get_mut(group) {
                    g.remove(key);
                }
            }
        }
        Ok(())
    }

    /// Apply `f` to every entry of a group.
    pub fn for_each_entry(
        &self,
        group: &str,
        mut f: impl FnMut(&K, &mut ArrayMap<ChannelId, V>),
    ) -> CacheResult<()> {
        let entries: Vec<(K, Arc<Entry<V>>)> = {
            let groups = self.groups.read().map_err(|e| self.poisoned(e))?;
            match groups.get(group) {
                Some(g) => g.iter().map(|(k, e)| (k.clone(), e.clone())).collect(),
                None => return Ok(()),
            }
        };
        let mut emptied = Vec::new();
        for (key, entry) in entries {
            let mut map = entry.write().map_err(|e| self.poisoned(e))?;
            f(&key, &mut map);
            if map.is_empty() {
                emptied.push(key);
            }
        }
        if !emptied.is_empty() {
            self.prune(group, &emptied)?;
        }
        Ok(())
    }

    /// Drop entries of a group that are still empty.
    fn prune(&self, group: &str, keys: &[K]) -> CacheResult<()> {
        let mut groups = self.groups.write().map_err(|e| self.poisoned(e))?;
        let Some(g) = groups.get_mut(group) else {
            return Ok(());
        };
        for key in keys {
            let empty = match g.get(key) {
                Some(entry) => entry.read().map_err(|e| self.poisoned(e))?.is_empty(),
                None => false,
            };
            if empty {
                g.remove(key);
            }
        }
        if g.is_empty() {
            groups.remove(group);
        }
        Ok(())
    }

    /// Drop every entry of one group.
    pub fn clear_group(&self, group: &str) -> CacheResult<()> {
        self.groups.write().map_err(|e| self.poisoned(e))?.remove(group);
        Ok(())
    }

    /// Drop every entry of every group.
    pub fn clear(&self) -> CacheResult<()> {
        self.groups.write().map_err(|e| self.poisoned(e))?.clear();
        Ok(())
    }

    /// Number of entries across all groups.
    pub fn len(&self) -> CacheResult<usize> {
        let groups = self.groups.read().map_err(|e| self.poisoned(e))?;
        Ok(groups.values().map(HashMap::len).sum())
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }
}
