//! Detecting foreign writes and keeping the cache warm.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use cmap_channel::ROOT_CHANNEL;
use cmap_store::{ContentRow, Expression};
use cmap_types::ChannelId;

use crate::datasource::Datasource;
use crate::error::{DatasourceResult, StoreContext};
use crate::object::ContentObject;

/// Result of a sync check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Sync checking is switched off.
    Disabled,
    /// Nothing was written since the last check.
    Unchanged,
    /// Modified objects were evicted or re-warmed.
    Refreshed { evicted: usize, warmed: usize },
    /// The cache was cleared.
    Cleared,
}

impl Datasource {
    /// Compare the store's last update with the last one seen and refresh
    /// the cache if something changed.
    pub fn check_for_updates(&self) -> DatasourceResult<RefreshOutcome> {
        if !self.config.sync_checking.enabled {
            return Ok(RefreshOutcome::Disabled);
        }
        let latest = self
            .backend
            .last_update()
            .during("reading last update of", self.identity())?;
        let since = self.last_seen.load(Ordering::Acquire);
        if latest <= since {
            return Ok(RefreshOutcome::Unchanged);
        }

        let outcome = if self.config.sync_checking.differential {
            self.refresh_since(since)
        } else {
            self.cache.clear_group(self.identity());
            info!(identity = self.identity(), "store changed, cache cleared");
            RefreshOutcome::Cleared
        };
        self.last_seen.fetch_max(latest, Ordering::AcqRel);
        Ok(outcome)
    }

    /// Evict or re-warm every object modified after `since`. Any failure
    /// clears the whole cache instead.
    pub fn refresh_since(&self, since: i64) -> RefreshOutcome {
        match self.try_refresh(since) {
            Ok((evicted, warmed)) => {
                info!(since, evicted, warmed, "cache refreshed");
                RefreshOutcome::Refreshed { evicted, warmed }
            }
            Err(e) => {
                warn!(since, error = %e, "differential cache refresh failed, clearing cache");
                self.cache.clear_all();
                RefreshOutcome::Cleared
            }
        }
    }

    fn try_refresh(&self, since: i64) -> DatasourceResult<(usize, usize)> {
        let group = self.identity();
        let warming = &self.config.cache_warming;
        let mut evicted = 0;
        let mut warmed = 0;

        for channel in self.walk_channels()? {
            let modified = self
                .backend
                .modified_since(channel, since)
                .during("refreshing channel", channel)?;
            if modified.is_empty() {
                continue;
            }
            debug!(channel, modified = modified.len(), "refreshing channel");
            for row in &modified {
                self.cache.invalidate_object(group, row, true);
                self.cache
                    .invalidate_attributes(group, row.channelset_id, Some(row.channel_id));
            }

            let keep = match &warming.filter {
                Some(filter) => {
                    let ids = modified.iter().map(|row| row.content_id).collect();
                    let expression =
                        Expression::And(vec![filter.clone(), Expression::ContentIds(ids)]);
                    self.backend
                        .query(&expression, &[channel])
                        .during("refreshing channel", channel)?
                }
                None => Vec::new(),
            };
            evicted += modified.len() - keep.len().min(modified.len());
            warmed += self.warm_rows(keep)?;
        }
        self.cache.clear_results(group);
        Ok((evicted, warmed))
    }

    /// Load the warming attributes for every object matching the warming
    /// filter, channel by channel. Returns the number of objects warmed.
    pub fn warm_cache(&self) -> DatasourceResult<usize> {
        let Some(filter) = &self.config.cache_warming.filter else {
            return Ok(0);
        };
        let mut warmed = 0;
        for channel in self.walk_channels()? {
            let rows = self
                .backend
                .query(filter, &[channel])
                .during("warming channel", channel)?;
            warmed += self.warm_rows(rows)?;
        }
        info!(identity = self.identity(), warmed, "cache warmed");
        Ok(warmed)
    }

    fn warm_rows(&self, rows: Vec<ContentRow>) -> DatasourceResult<usize> {
        let group = self.identity();
        let mut objects: Vec<ContentObject> = rows
            .into_iter()
            .map(|row| {
                let object = ContentObject::from_row(&row);
                self.cache.put_object(group, Arc::new(row));
                object
            })
            .collect();
        let attributes = &self.config.cache_warming.attributes;
        if !attributes.is_empty() {
            self.load_bulk(&mut objects, attributes)?;
        }
        Ok(objects.len())
    }

    /// The root channel followed by every tree channel in pre-order.
    fn walk_channels(&self) -> DatasourceResult<Vec<ChannelId>> {
        let tree = self.read_tree()?;
        Ok(std::iter::once(ROOT_CHANNEL)
            .chain(tree.channels().into_iter().map(|c| c.id))
            .collect())
    }
}
