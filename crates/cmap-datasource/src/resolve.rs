//! Object identity resolution.
//!
//! Every entry point ends with either a persisted row or "does not exist".
//! Content ids are not unique across channels, so a content id lookup that
//! misses the selected leaf channels falls back to the channelset of the
//! nearest inherited row, which surfaces localized variants that carry a
//! different content id.

use std::sync::Arc;

use tracing::debug;

use cmap_store::ContentRow;
use cmap_types::{ChannelsetId, ContentId, InternalId, ObjectType};

use crate::context::{ChannelContext, ChannelScope};
use crate::datasource::Datasource;
use crate::error::{DatasourceError, DatasourceResult, StoreContext};
use crate::object::ContentObject;

/// The row most specific to the scope: the pinned channel if any, else the
/// best-ranked channel along the selected paths.
pub(crate) fn most_specific(
    scope: &ChannelScope,
    rows: impl IntoIterator<Item = ContentRow>,
) -> Option<ContentRow> {
    if let Some(pinned) = scope.pinned() {
        return rows.into_iter().find(|r| r.channel_id == pinned);
    }
    nearest(scope, rows)
}

/// The best-ranked row along the selected paths, ignoring any pin.
pub(crate) fn nearest(scope: &ChannelScope, rows: impl IntoIterator<Item = ContentRow>) -> Option<ContentRow> {
    rows.into_iter()
        .filter_map(|row| scope.rank(row.channel_id).map(|rank| (rank, row)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, row)| row)
}

fn type_checked(row: Arc<ContentRow>, expected: Option<ObjectType>) -> Option<Arc<ContentRow>> {
    match expected {
        Some(t) if t != row.obj_type() => {
            debug!(
                id = row.id,
                expected = t,
                actual = row.obj_type(),
                "channelset resolved to another object type"
            );
            None
        }
        _ => Some(row),
    }
}

impl Datasource {
    /// Primary row by internal id, through the object cache.
    pub(crate) fn row_by_id(&self, id: InternalId) -> DatasourceResult<Option<Arc<ContentRow>>> {
        let group = self.identity();
        if let Some(row) = self.cache.object(group, id) {
            return Ok(Some(row));
        }
        let row = self.backend.content_by_id(id).during("loading object", id)?;
        Ok(row.map(|row| {
            let row = Arc::new(row);
            self.cache.put_object(group, row.clone());
            row
        }))
    }

    /// Load an object by internal id. Non-positive ids never exist.
    pub fn object_by_id(&self, id: InternalId) -> DatasourceResult<Option<ContentObject>> {
        if id <= 0 {
            return Ok(None);
        }
        Ok(self.row_by_id(id)?.map(|row| ContentObject::from_row(&row)))
    }

    /// The variant of a channelset visible in the context.
    ///
    /// With `object_type` set, a variant of another type counts as missing.
    pub fn object_by_channelset(
        &self,
        ctx: &ChannelContext,
        channelset: ChannelsetId,
        object_type: Option<ObjectType>,
    ) -> DatasourceResult<Option<ContentObject>> {
        let scope = self.scope(ctx)?;
        Ok(self
            .resolve_channelset(&scope, channelset, object_type)?
            .map(|row| ContentObject::from_row(&row)))
    }

    /// The variant a content id denotes in the context. If resolution
    /// surfaced a variant with another content id, the returned object
    /// carries that id and records the requested object id in
    /// `stored_object_id`.
    pub fn object_by_content_id(
        &self,
        ctx: &ChannelContext,
        content_id: ContentId,
    ) -> DatasourceResult<Option<ContentObject>> {
        let scope = self.scope(ctx)?;
        Ok(self.resolve_content_id(&scope, &content_id)?.map(|row| {
            let mut object = ContentObject::new(content_id);
            object.adopt_row(&row);
            object
        }))
    }

    /// Like [`object_by_content_id`](Self::object_by_content_id) but a
    /// missing object is an error.
    pub fn load(&self, ctx: &ChannelContext, content_id: ContentId) -> DatasourceResult<ContentObject> {
        self.object_by_content_id(ctx, content_id)?
            .ok_or_else(|| DatasourceError::ObjectNotFound(content_id.to_string()))
    }

    /// Resolve an object in place by the most precise identity it carries:
    /// internal id, then channelset id, then content id. Leaves
    /// `internal_id` positive or marked missing. Returns whether it exists.
    pub fn resolve(&self, ctx: &ChannelContext, object: &mut ContentObject) -> DatasourceResult<bool> {
        let row = if object.internal_id > 0 {
            self.row_by_id(object.internal_id)?
        } else {
            let scope = self.scope(ctx)?;
            if object.channelset_id > 0 {
                let expected = (object.obj_type() != 0).then(|| object.obj_type());
                self.resolve_channelset(&scope, object.channelset_id, expected)?
            } else {
                self.resolve_content_id(&scope, &object.content_id)?
            }
        };
        match row {
            Some(row) => {
                object.adopt_row(&row);
                Ok(true)
            }
            None => {
                debug!(content_id = %object.content_id, "object does not exist");
                object.mark_missing();
                Ok(false)
            }
        }
    }

    pub(crate) fn resolve_channelset(
        &self,
        scope: &ChannelScope,
        channelset: ChannelsetId,
        object_type: Option<ObjectType>,
    ) -> DatasourceResult<Option<Arc<ContentRow>>> {
        let group = self.identity();
        let cache_channel = scope.cache_channel();

        if let Some(channel) = cache_channel {
            if let Some(id) = self.cache.channelset(group, channelset, channel) {
                if let Some(row) = self.row_by_id(id)? {
                    if row.channelset_id == channelset {
                        return Ok(type_checked(row, object_type));
                    }
                }
            }
        }

        let rows = self
            .backend
            .content_by_channelset(channelset, &scope.channelset_channels())
            .during("resolving channelset", channelset)?;
        let Some(row) = most_specific(scope, rows) else {
            debug!(channelset, "channelset not found in scope");
            return Ok(None);
        };

        let row = Arc::new(row);
        self.cache.put_object(group, row.clone());
        if let Some(channel) = cache_channel {
            self.cache.put_channelset(group, channelset, channel, row.id);
        }
        Ok(type_checked(row, object_type))
    }

    pub(crate) fn resolve_content_id(
        &self,
        scope: &ChannelScope,
        content_id: &ContentId,
    ) -> DatasourceResult<Option<Arc<ContentRow>>> {
        let group = self.identity();
        let cache_channel = scope.content_id_cache_channel();

        if let Some(channel) = cache_channel {
            if let Some(id) = self.cache.content_id(group, content_id, channel) {
                if let Some(row) = self.row_by_id(id)? {
                    return Ok(Some(row));
                }
            }
        }

        let rows = self
            .backend
            .content_by_content_id(content_id, &scope.channels())
            .during("resolving content id", content_id)?;
        let (direct, inherited): (Vec<ContentRow>, Vec<ContentRow>) =
            rows.into_iter().partition(|r| scope.is_leaf(r.channel_id));

        // A pin narrows only the channelset fallback.
        let row = match nearest(scope, direct) {
            Some(row) => {
                let row = Arc::new(row);
                self.cache.put_object(group, row.clone());
                Some(row)
            }
            None => match nearest(scope, inherited) {
                Some(inherited_row) => {
                    debug!(
                        content_id = %content_id,
                        channel = inherited_row.channel_id,
                        channelset = inherited_row.channelset_id,
                        "no variant in selected channels, resolving by channelset"
                    );
                    self.resolve_channelset(scope, inherited_row.channelset_id, Some(content_id.obj_type()))?
                }
                None => None,
            },
        };

        if let (Some(row), Some(channel)) = (&row, cache_channel) {
            self.cache.put_content_id(group, *content_id, channel, row.id);
        }
        Ok(row)
    }
}
