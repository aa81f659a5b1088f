//! Attribute loading: single attributes through the cache, and batch
//! prefetching for many objects at once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use cmap_cache::CachedAttribute;
use cmap_store::{AttributeRow, ContentRow, Expression, RowValue};
use cmap_types::{
    AttributeKind, AttributeType, AttributeValue, ChannelId, ContentId, InternalId, StorageClass,
};

use crate::context::ChannelContext;
use crate::datasource::Datasource;
use crate::error::{DatasourceError, DatasourceResult, StoreContext};
use crate::object::ContentObject;
use crate::query::Paging;

/// What a prefetch did, by attribute path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Attributes loaded in bulk from the store.
    pub bulk: Vec<String>,
    /// Attributes served from the cache; remaining misses load lazily.
    pub cached: Vec<String>,
    /// Backend round trips issued.
    pub queries: usize,
}

impl PrefetchReport {
    fn merge(&mut self, prefix: &str, other: PrefetchReport) {
        self.bulk
            .extend(other.bulk.into_iter().map(|name| format!("{prefix}.{name}")));
        self.cached
            .extend(other.cached.into_iter().map(|name| format!("{prefix}.{name}")));
        self.queries += other.queries;
    }
}

/// Split requested paths into local attribute names and, per link
/// attribute, the sub-paths to prefetch on the linked objects.
fn split_paths(paths: &[&str]) -> (BTreeSet<String>, BTreeMap<String, Vec<String>>) {
    let mut local = BTreeSet::new();
    let mut nested: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in paths {
        match path.split_once('.') {
            Some((head, rest)) => {
                local.insert(head.to_string());
                nested.entry(head.to_string()).or_default().push(rest.to_string());
            }
            None => {
                local.insert(path.to_string());
            }
        }
    }
    (local, nested)
}

impl Datasource {
    /// Values of one attribute, loading and caching them if needed.
    ///
    /// Unresolved objects are resolved first. A missing object has no
    /// values. The result is also stored on the object.
    pub fn get(
        &self,
        ctx: &ChannelContext,
        object: &mut ContentObject,
        name: &str,
    ) -> DatasourceResult<Vec<AttributeValue>> {
        if let Some(values) = object.values(name) {
            return Ok(values.to_vec());
        }
        if object.internal_id == 0 {
            self.resolve(ctx, object)?;
        }
        if !object.exists() {
            object.set(name, Vec::new());
            return Ok(Vec::new());
        }

        let attribute = self.attribute_type(object.obj_type(), name)?;
        let values = match attribute.storage_class() {
            StorageClass::ForeignLink => self.foreign_links(ctx, object, attribute)?,
            _ => self.cached_or_loaded(object, attribute)?,
        };
        object.set(name, values.clone());
        Ok(values)
    }

    fn cached_or_loaded(
        &self,
        object: &ContentObject,
        attribute: &AttributeType,
    ) -> DatasourceResult<Vec<AttributeValue>> {
        let group = self.identity();
        let name = attribute.name.as_str();
        if let Some(cached) = self
            .cache
            .attribute(group, name, object.channelset_id, object.channel_id)
        {
            return Ok(cached.to_values());
        }

        let values: Vec<AttributeValue> = match attribute.storage_class() {
            StorageClass::Optimized => self
                .row_by_id(object.internal_id)?
                .and_then(|row| self.column_value(attribute, &row))
                .into_iter()
                .collect(),
            _ => {
                let rows = self
                    .backend
                    .attribute_rows(&[object.internal_id], &[attribute.name.clone()])
                    .during("loading attribute of", &object.content_id)?;
                rows.iter()
                    .map(|row| self.decode(attribute, &row.value))
                    .collect::<DatasourceResult<Vec<_>>>()?
                    .into_iter()
                    .flatten()
                    .collect()
            }
        };
        self.cache.put_attribute(
            group,
            name,
            object.channelset_id,
            object.channel_id,
            CachedAttribute::from_values(values.clone()),
        );
        Ok(values)
    }

    fn column_value(&self, attribute: &AttributeType, row: &ContentRow) -> Option<AttributeValue> {
        let column = attribute.quick_column.as_deref()?;
        self.normalizer.from_row_lossy(attribute, row.columns.get(column)?)
    }

    /// Turn a stored value back into an attribute value. Blob files are
    /// read and verified; unreadable column values degrade to `None`.
    fn decode(&self, attribute: &AttributeType, value: &RowValue) -> DatasourceResult<Option<AttributeValue>> {
        match value {
            RowValue::File(blob) => {
                let data = self.blob_store()?.read(blob)?;
                Ok(Some(match attribute.kind {
                    AttributeKind::Text | AttributeKind::LongText => {
                        AttributeValue::Text(String::from_utf8_lossy(&data).into_owned())
                    }
                    _ => AttributeValue::Binary(data),
                }))
            }
            other => Ok(self.normalizer.from_row_lossy(attribute, other)),
        }
    }

    // ---------------------------------------------------------------
    // Links
    // ---------------------------------------------------------------

    /// Objects of the linked type whose back-link attribute points at the
    /// owner, as link values.
    fn foreign_links(
        &self,
        ctx: &ChannelContext,
        owner: &ContentObject,
        attribute: &AttributeType,
    ) -> DatasourceResult<Vec<AttributeValue>> {
        let (Some(linked_type), Some(back)) = (
            attribute.linked_object_type,
            attribute.foreign_link_attribute.as_deref(),
        ) else {
            return Ok(Vec::new());
        };
        let back_link = self.attribute_type(linked_type, back)?;
        let value = RowValue::Text(owner.content_id.to_string());
        let condition = match (back_link.storage_class(), &back_link.quick_column) {
            (StorageClass::Optimized, Some(column)) => Expression::ColumnEquals {
                column: column.clone(),
                value,
            },
            _ => Expression::AttributeEquals {
                name: back.to_string(),
                value,
            },
        };
        let filter = Expression::And(vec![Expression::ObjectType(linked_type), condition]);
        let linking = self.query(ctx, &filter, Paging::default())?;
        Ok(linking
            .into_iter()
            .map(|object| AttributeValue::Link(object.content_id))
            .collect())
    }

    /// Resolve a link target in the owner's channel.
    ///
    /// A target that does not exist, or an owner channel that no longer
    /// does, yields `None`.
    pub fn resolve_link(
        &self,
        ctx: &ChannelContext,
        owner: &ContentObject,
        target: ContentId,
    ) -> DatasourceResult<Option<ContentObject>> {
        let channel = if owner.channel_id > 0 {
            owner.channel_id
        } else {
            ctx.write_channel()
        };
        match self.object_by_content_id(&ctx.scoped(channel), target) {
            Ok(Some(linked)) => Ok(Some(linked)),
            Ok(None) => {
                warn!(owner = %owner.content_id, target = %target, channel, "broken link");
                Ok(None)
            }
            Err(DatasourceError::UnknownChannel(channel)) => {
                warn!(owner = %owner.content_id, target = %target, channel, "link owner channel unknown");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve every link value of an attribute, skipping broken links.
    pub fn linked_objects(
        &self,
        ctx: &ChannelContext,
        owner: &mut ContentObject,
        name: &str,
    ) -> DatasourceResult<Vec<ContentObject>> {
        let targets: Vec<ContentId> = self
            .get(ctx, owner, name)?
            .iter()
            .filter_map(AttributeValue::as_link)
            .collect();
        let mut linked = Vec::with_capacity(targets.len());
        for target in targets {
            if let Some(object) = self.resolve_link(ctx, owner, target)? {
                linked.push(object);
            }
        }
        Ok(linked)
    }

    // ---------------------------------------------------------------
    // Prefetch
    // ---------------------------------------------------------------

    /// Load attributes for many objects at once.
    ///
    /// Paths may be dotted (`link.sub`): the link attribute is loaded
    /// locally and `sub` is prefetched on every linked object. For each
    /// local attribute the cache is checked first when few objects are
    /// involved; if enough lookups hit, nothing is loaded. Otherwise the
    /// attribute is bulk-loaded for every object that lacks it.
    pub fn prefetch(
        &self,
        ctx: &ChannelContext,
        objects: &mut [ContentObject],
        paths: &[&str],
    ) -> DatasourceResult<PrefetchReport> {
        let mut report = PrefetchReport::default();
        if !self.config.prefetch.enabled || objects.is_empty() {
            return Ok(report);
        }
        for object in objects.iter_mut() {
            if object.internal_id == 0 {
                self.resolve(ctx, object)?;
            }
        }

        let (local, nested) = split_paths(paths);
        let group = self.identity();
        let mut bulk = Vec::new();

        for name in &local {
            let mut candidates = Vec::new();
            for i in 0..objects.len() {
                let object = &objects[i];
                if !object.exists() || object.has(name) {
                    continue;
                }
                match self.schema.get(object.obj_type(), name).map(AttributeType::storage_class) {
                    None => {}
                    Some(StorageClass::ForeignLink) => {
                        self.get(ctx, &mut objects[i], name)?;
                    }
                    Some(_) => candidates.push(i),
                }
            }
            if candidates.is_empty() {
                continue;
            }

            if candidates.len() < self.config.prefetch.threshold && self.cache.is_enabled() {
                let mut hits = Vec::new();
                for &i in &candidates {
                    let object = &objects[i];
                    if let Some(cached) =
                        self.cache
                            .attribute(group, name, object.channelset_id, object.channel_id)
                    {
                        hits.push((i, cached));
                    }
                }
                let misses = candidates.len() - hits.len();
                if self.config.prefetch.misses_tolerable(misses, candidates.len()) {
                    debug!(attribute = %name, hits = hits.len(), misses, "prefetch served from cache");
                    for (i, cached) in hits {
                        objects[i].set(name.clone(), cached.to_values());
                    }
                    report.cached.push(name.clone());
                    continue;
                }
            }
            bulk.push(name.clone());
        }

        if !bulk.is_empty() {
            report.queries += self.load_bulk(objects, &bulk)?;
            report.bulk = bulk;
        }

        // Nested loads only pay off through the cache.
        if !nested.is_empty() && !self.cache.is_enabled() {
            debug!(paths = nested.len(), "cache disabled, skipping nested prefetch");
            return Ok(report);
        }
        for (head, subs) in nested {
            let subs: Vec<&str> = subs.iter().map(String::as_str).collect();
            let mut targets: BTreeMap<ChannelId, BTreeSet<ContentId>> = BTreeMap::new();
            for object in objects.iter().filter(|o| o.exists()) {
                let links = object
                    .values(&head)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(AttributeValue::as_link);
                targets.entry(object.channel_id).or_default().extend(links);
            }
            for (channel, ids) in targets {
                if ids.is_empty() {
                    continue;
                }
                let scoped = ctx.scoped(channel);
                let filter = Expression::ContentIds(ids.into_iter().collect());
                let mut linked = self.query(&scoped, &filter, Paging::default())?;
                report.queries += 1;
                let sub_report = self.prefetch(&scoped, &mut linked, &subs)?;
                report.merge(&head, sub_report);
            }
        }
        Ok(report)
    }

    /// Load attributes for every existing object lacking them, in chunks of
    /// `batch_size`: one primary-row query per chunk for optimized
    /// attributes and one attribute-row query per chunk for the rest.
    /// Objects without stored values get an empty value and a cached null.
    /// Returns the number of backend queries issued.
    pub(crate) fn load_bulk(&self, objects: &mut [ContentObject], names: &[String]) -> DatasourceResult<usize> {
        let wanted = |object: &ContentObject, name: &str| {
            object.exists()
                && !object.has(name)
                && self
                    .schema
                    .get(object.obj_type(), name)
                    .is_some_and(|a| a.storage_class() != StorageClass::ForeignLink)
        };

        let mut owners: BTreeMap<InternalId, Vec<usize>> = BTreeMap::new();
        let mut needs_rows = false;
        let mut generic = BTreeSet::new();
        for (i, object) in objects.iter().enumerate() {
            let mut owned = false;
            for name in names.iter().filter(|name| wanted(object, name.as_str())) {
                owned = true;
                match self.schema.get(object.obj_type(), name).map(AttributeType::storage_class) {
                    Some(StorageClass::Optimized) => needs_rows = true,
                    Some(StorageClass::Generic | StorageClass::Filesystem) => {
                        generic.insert(name.clone());
                    }
                    _ => {}
                }
            }
            if owned {
                owners.entry(object.internal_id).or_default().push(i);
            }
        }
        if owners.is_empty() {
            return Ok(0);
        }
        let ids: Vec<InternalId> = owners.keys().copied().collect();
        let generic: Vec<String> = generic.into_iter().collect();

        let group = self.identity();
        let mut queries = 0;
        for chunk in ids.chunks(self.config.batch_size) {
            if needs_rows {
                let rows = self
                    .backend
                    .content_by_ids(chunk)
                    .during("bulk loading objects", format!("{} ids", chunk.len()))?;
                queries += 1;
                for row in rows {
                    let indices = owners.get(&row.id).map(Vec::as_slice).unwrap_or_default();
                    for name in names {
                        let Some(attribute) = self
                            .schema
                            .get(row.obj_type(), name)
                            .filter(|a| a.storage_class() == StorageClass::Optimized)
                        else {
                            continue;
                        };
                        let values = self.column_value(attribute, &row).into_iter().collect();
                        self.store_loaded(objects, indices, name, values);
                    }
                    self.cache.put_object(group, Arc::new(row));
                }
            }

            if !generic.is_empty() {
                let rows = self
                    .backend
                    .attribute_rows(chunk, &generic)
                    .during("bulk loading attributes", format!("{} ids", chunk.len()))?;
                queries += 1;
                self.stream_attribute_rows(objects, &owners, rows)?;
            }
        }

        for indices in owners.values() {
            for name in names {
                for &i in indices {
                    if wanted(&objects[i], name.as_str()) {
                        self.store_loaded(objects, &[i], name, Vec::new());
                    }
                }
            }
        }
        debug!(objects = ids.len(), attributes = names.len(), queries, "bulk load finished");
        Ok(queries)
    }

    /// Group ordered attribute rows by owner and name in a single pass.
    fn stream_attribute_rows(
        &self,
        objects: &mut [ContentObject],
        owners: &BTreeMap<InternalId, Vec<usize>>,
        rows: Vec<AttributeRow>,
    ) -> DatasourceResult<()> {
        let mut current: Option<(InternalId, String, Vec<AttributeValue>)> = None;
        for row in rows {
            let same = matches!(&current, Some((id, name, _)) if *id == row.map_id && *name == row.name);
            if !same {
                if let Some((id, name, values)) = current.take() {
                    self.flush_group(objects, owners, id, &name, values);
                }
                current = Some((row.map_id, row.name.clone(), Vec::new()));
            }
            let Some(indices) = owners.get(&row.map_id) else {
                continue;
            };
            let obj_type = objects[indices[0]].obj_type();
            let Some(attribute) = self.schema.get(obj_type, &row.name) else {
                continue;
            };
            if let (Some(value), Some((_, _, values))) = (self.decode(attribute, &row.value)?, current.as_mut()) {
                values.push(value);
            }
        }
        if let Some((id, name, values)) = current {
            self.flush_group(objects, owners, id, &name, values);
        }
        Ok(())
    }

    fn flush_group(
        &self,
        objects: &mut [ContentObject],
        owners: &BTreeMap<InternalId, Vec<usize>>,
        id: InternalId,
        name: &str,
        values: Vec<AttributeValue>,
    ) {
        if let Some(indices) = owners.get(&id) {
            self.store_loaded(objects, indices, name, values);
        }
    }

    /// Set loaded values on objects that do not hold the attribute yet and
    /// cache them.
    fn store_loaded(&self, objects: &mut [ContentObject], indices: &[usize], name: &str, values: Vec<AttributeValue>) {
        let group = self.identity();
        for &i in indices {
            let object = &mut objects[i];
            if object.has(name) {
                continue;
            }
            self.cache.put_attribute(
                group,
                name,
                object.channelset_id,
                object.channel_id,
                CachedAttribute::from_values(values.clone()),
            );
            object.set(name, values.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_paths_groups_sub_attributes() {
        let (local, nested) = split_paths(&["name", "author.name", "author.email", "folder.parent.name"]);
        assert_eq!(
            local.into_iter().collect::<Vec<_>>(),
            vec!["author", "folder", "name"]
        );
        assert_eq!(nested["author"], vec!["name", "email"]);
        assert_eq!(nested["folder"], vec!["parent.name"]);
    }

    #[test]
    fn report_merge_prefixes_paths() {
        let mut report = PrefetchReport {
            bulk: vec!["author".into()],
            cached: Vec::new(),
            queries: 1,
        };
        report.merge(
            "author",
            PrefetchReport {
                bulk: vec!["name".into()],
                cached: vec!["email".into()],
                queries: 2,
            },
        );
        assert_eq!(report.bulk, vec!["author", "author.name"]);
        assert_eq!(report.cached, vec!["author.email"]);
        assert_eq!(report.queries, 3);
    }
}
