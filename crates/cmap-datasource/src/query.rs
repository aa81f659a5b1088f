//! Filtered queries with result and count caching.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use cmap_cache::QueryKey;
use cmap_store::{ContentRow, Expression};
use cmap_types::{ChannelsetId, InternalId};

use crate::context::{ChannelContext, ChannelScope};
use crate::datasource::Datasource;
use crate::error::{DatasourceResult, StoreContext};
use crate::object::ContentObject;
use crate::resolve::most_specific;

/// A window over a query result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Paging {
    pub start: usize,
    pub limit: Option<usize>,
}

impl Paging {
    /// Skip `start` results and return at most `limit`.
    pub fn new(start: usize, limit: usize) -> Self {
        Self {
            start,
            limit: Some(limit),
        }
    }

    fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let items = items.into_iter().skip(self.start);
        match self.limit {
            Some(limit) => items.take(limit).collect(),
            None => items.collect(),
        }
    }
}

impl Datasource {
    /// Objects matching a filter in the context's channels, one variant per
    /// channelset, ordered by internal id.
    pub fn query(
        &self,
        ctx: &ChannelContext,
        filter: &Expression,
        paging: Paging,
    ) -> DatasourceResult<Vec<ContentObject>> {
        let scope = self.scope(ctx)?;
        let group = self.identity();
        let channels = scope.channels();
        let key = QueryKey::new(&channels, &filter.to_sql(), paging.start, paging.limit);

        let rows = match self.cache.results(group, &key) {
            Some(rows) => rows,
            None => {
                let visible = self.visible_rows(&scope, filter)?;
                let rows = Arc::new(paging.apply(visible));
                for row in rows.iter() {
                    self.cache.put_object(group, Arc::new(row.clone()));
                }
                self.cache.put_results(group, key, rows.clone());
                rows
            }
        };
        Ok(rows.iter().map(ContentObject::from_row).collect())
    }

    /// Number of objects [`query`](Self::query) would return without paging.
    pub fn count(&self, ctx: &ChannelContext, filter: &Expression) -> DatasourceResult<usize> {
        let scope = self.scope(ctx)?;
        let group = self.identity();
        let key = QueryKey::new(&scope.channels(), &filter.to_sql(), 0, None);
        if let Some(count) = self.cache.count(group, &key) {
            return Ok(count);
        }
        let count = self.visible_rows(&scope, filter)?.len();
        self.cache.put_count(group, key, count);
        Ok(count)
    }

    /// The most specific variant of every channelset in scope, kept only
    /// if that variant matches the filter. A matching ancestor variant never
    /// stands in for a localized one that does not match.
    fn visible_rows(&self, scope: &ChannelScope, filter: &Expression) -> DatasourceResult<Vec<ContentRow>> {
        let channels = scope.channels();
        let matched = self
            .backend
            .query(filter, &channels)
            .during("querying", filter.to_sql().sql)?;
        if matched.is_empty() {
            return Ok(Vec::new());
        }
        let matching: BTreeSet<InternalId> = matched.iter().map(|row| row.id).collect();
        let channelsets: Vec<ChannelsetId> = matched
            .iter()
            .map(|row| row.channelset_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut variants: BTreeMap<ChannelsetId, Vec<ContentRow>> = BTreeMap::new();
        for chunk in channelsets.chunks(self.config.batch_size) {
            let rows = self
                .backend
                .content_by_channelsets(chunk, &channels)
                .during("loading variants", format!("{} channelsets", chunk.len()))?;
            for row in rows {
                variants.entry(row.channelset_id).or_default().push(row);
            }
        }
        let mut visible: Vec<ContentRow> = variants
            .into_values()
            .filter_map(|rows| most_specific(scope, rows))
            .filter(|row| matching.contains(&row.id))
            .collect();
        visible.sort_by_key(|row| row.id);

        debug!(matched = matched.len(), visible = visible.len(), "query evaluated");
        Ok(visible)
    }
}
