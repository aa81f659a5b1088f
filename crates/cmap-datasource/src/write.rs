//! Insert, update and delete.
//!
//! Values are coerced up front so a malformed value aborts the write before
//! anything reaches the store. Updates are diffed against a snapshot of the
//! persisted rows and only changed positions and columns are written.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use cmap_blob::BlobTarget;
use cmap_diff::{diff_attribute, diff_columns, StatementBatch};
use cmap_store::{AttributeRow, ContentRow, RowValue, Statement};
use cmap_types::{AttributeType, AttributeValue, ChannelId, InternalId, ObjectType, StorageClass};

use crate::context::ChannelContext;
use crate::datasource::{now_millis, Datasource};
use crate::error::{DatasourceError, DatasourceResult, StoreContext};
use crate::object::ContentObject;

/// The statements one object's update needs, and what they touch.
#[derive(Debug, Default)]
struct UpdatePlan {
    batch: StatementBatch,
    changed: Vec<String>,
    content_id_changed: bool,
}

/// A new object checked and coerced, ready to be written.
struct PreparedInsert<'a> {
    channel: ChannelId,
    columns: BTreeMap<String, RowValue>,
    generic: Vec<(&'a AttributeType, Vec<RowValue>)>,
}

impl Datasource {
    /// Persist a new object.
    ///
    /// The object is written to its own channel if set, else to the
    /// context's write channel. A zero channelset id starts a new
    /// channelset. On success the object carries its generated ids.
    pub fn insert(&self, ctx: &ChannelContext, object: &mut ContentObject) -> DatasourceResult<()> {
        self.insert_batch(ctx, std::slice::from_mut(object))?;
        Ok(())
    }

    /// Persist many new objects.
    ///
    /// Every value is coerced before anything is written. Primary rows are
    /// inserted one by one for their generated ids, then all attribute rows
    /// go out as one statement group. If that group fails, the primary rows
    /// are removed again. Returns the number of attribute statements.
    pub fn insert_batch(&self, ctx: &ChannelContext, objects: &mut [ContentObject]) -> DatasourceResult<usize> {
        let mut prepared = Vec::with_capacity(objects.len());
        for object in objects.iter() {
            prepared.push(self.prepare_insert(ctx, object)?);
        }

        // Resolutions cached for other variants may now prefer the new ones.
        let mut siblings = Vec::new();
        for object in objects.iter().filter(|o| o.channelset_id > 0) {
            siblings.extend(
                self.backend
                    .content_by_channelset(object.channelset_id, &[])
                    .during("inserting into channelset", object.channelset_id)?,
            );
        }

        let now = now_millis();
        let mut inserted = Vec::with_capacity(objects.len());
        for (object, insert) in objects.iter().zip(&mut prepared) {
            let mut row = ContentRow::new(object.content_id, insert.channel, object.channelset_id);
            row.update_timestamp = now;
            row.columns = std::mem::take(&mut insert.columns);
            match self.backend.insert_content(&row) {
                Ok(row) => inserted.push(row),
                Err(source) => {
                    self.roll_back_inserts(&inserted);
                    return Err(DatasourceError::Store {
                        operation: "inserting",
                        object: object.content_id.to_string(),
                        source,
                    });
                }
            }
        }

        let executed = match self.insert_attributes(&inserted, prepared) {
            Ok(executed) => executed,
            Err(e) => {
                self.roll_back_inserts(&inserted);
                return Err(e);
            }
        };

        let group = self.identity();
        for row in siblings.iter().chain(&inserted) {
            self.cache.invalidate_object(group, row, true);
        }
        for (object, row) in objects.iter_mut().zip(&inserted) {
            self.cache
                .invalidate_attributes(group, row.channelset_id, Some(row.channel_id));
            object.adopt_row(row);
            info!(
                id = row.id,
                content_id = %row.content_id,
                channel = row.channel_id,
                channelset = row.channelset_id,
                "object inserted"
            );
        }
        self.cache.clear_results(group);
        Ok(executed)
    }

    /// Check and coerce one new object without touching the store.
    fn prepare_insert(&self, ctx: &ChannelContext, object: &ContentObject) -> DatasourceResult<PreparedInsert<'_>> {
        if object.exists() {
            return Err(DatasourceError::AlreadyExists(object.content_id.to_string()));
        }
        let channel = if object.channel_id > 0 {
            object.channel_id
        } else {
            ctx.write_channel()
        };
        self.read_tree()?.find_channel(channel)?;

        let obj_type = object.obj_type();
        let mut insert = PreparedInsert {
            channel,
            columns: BTreeMap::new(),
            generic: Vec::new(),
        };
        for (name, values) in object.attributes() {
            let attribute = self.attribute_type(obj_type, name)?;
            match attribute.storage_class() {
                StorageClass::ForeignLink => {}
                StorageClass::Optimized => {
                    if let (Some(column), Some(value)) = (&attribute.quick_column, values.first()) {
                        insert
                            .columns
                            .insert(column.clone(), self.normalizer.to_row(attribute, value)?);
                    }
                }
                StorageClass::Generic | StorageClass::Filesystem => {
                    insert.generic.push((attribute, self.coerce_all(attribute, values)?));
                }
            }
        }
        Ok(insert)
    }

    fn insert_attributes(&self, rows: &[ContentRow], prepared: Vec<PreparedInsert<'_>>) -> DatasourceResult<usize> {
        let mut batch = StatementBatch::new();
        for (row, insert) in rows.iter().zip(prepared) {
            for (attribute, values) in insert.generic {
                for (position, value) in values.into_iter().enumerate() {
                    let sort_order = position as i32;
                    batch.push(Statement::InsertAttribute {
                        map_id: row.id,
                        name: attribute.name.clone(),
                        sort_order,
                        value: self.materialize(attribute, row.obj_type(), row.id, sort_order, value)?,
                    });
                }
            }
        }
        self.commit(batch)
    }

    fn roll_back_inserts(&self, rows: &[ContentRow]) {
        if rows.is_empty() {
            return;
        }
        let statements: Vec<Statement> = rows
            .iter()
            .map(|row| Statement::DeleteContent { id: row.id })
            .collect();
        if let Err(e) = self.backend.execute(&statements) {
            warn!(count = rows.len(), error = %e, "could not roll back partial insert");
        }
    }

    /// Persist the changes of one existing object.
    pub fn update(&self, ctx: &ChannelContext, object: &mut ContentObject) -> DatasourceResult<usize> {
        self.update_batch(ctx, std::slice::from_mut(object))
    }

    /// Persist the changes of many objects in one statement group.
    ///
    /// Primary rows and attribute snapshots are loaded in chunks up front.
    /// Attributes an object does not hold are left untouched. Returns the
    /// number of statements executed.
    pub fn update_batch(&self, ctx: &ChannelContext, objects: &mut [ContentObject]) -> DatasourceResult<usize> {
        for object in objects.iter_mut() {
            if object.internal_id == 0 {
                self.resolve(ctx, object)?;
            }
            if !object.exists() {
                return Err(DatasourceError::ObjectNotFound(object.content_id.to_string()));
            }
        }

        let (rows, snapshots) = self.snapshot(objects)?;
        let now = now_millis();
        let mut batch = StatementBatch::new();
        let mut plans = Vec::with_capacity(objects.len());
        for object in objects.iter() {
            let row = rows
                .get(&object.internal_id)
                .ok_or_else(|| DatasourceError::ObjectNotFound(object.content_id.to_string()))?;
            let snapshot = snapshots
                .get(&object.internal_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let mut plan = self.plan_update(object, row, snapshot, now)?;
            batch.append(std::mem::take(&mut plan.batch));
            plans.push(plan);
        }

        if batch.is_empty() {
            debug!(objects = objects.len(), "update found nothing to write");
            return Ok(0);
        }
        let executed = self.commit(batch)?;

        let group = self.identity();
        for (object, plan) in objects.iter_mut().zip(&plans) {
            if plan.changed.is_empty() && !plan.content_id_changed {
                continue;
            }
            let Some(old) = rows.get(&object.internal_id) else {
                continue;
            };
            self.cache.invalidate_object(group, old, false);
            for name in &plan.changed {
                self.cache
                    .invalidate_attribute(group, name, object.channelset_id, object.channel_id);
            }
            if plan.content_id_changed {
                self.cache.invalidate_content_id(group, &old.content_id, None);
            }
            object.update_timestamp = now;
        }
        self.cache.clear_results(group);
        debug!(objects = objects.len(), statements = executed, "objects updated");
        Ok(executed)
    }

    /// Insert if the object does not exist yet, else update it.
    pub fn save(&self, ctx: &ChannelContext, object: &mut ContentObject) -> DatasourceResult<()> {
        if object.internal_id == 0 {
            self.resolve(ctx, object)?;
        }
        if object.exists() {
            self.update(ctx, object)?;
        } else {
            object.internal_id = 0;
            self.insert(ctx, object)?;
        }
        Ok(())
    }

    /// Delete an object variant with all its attributes. Filesystem blobs
    /// are removed after the delete commits. Returns `false` if there was
    /// nothing to delete.
    pub fn delete(&self, object: &mut ContentObject) -> DatasourceResult<bool> {
        Ok(self.delete_batch(std::slice::from_mut(object))? > 0)
    }

    /// Delete many object variants in one statement group. Objects that do
    /// not exist are skipped and marked missing. Returns the number of
    /// objects deleted.
    pub fn delete_batch(&self, objects: &mut [ContentObject]) -> DatasourceResult<usize> {
        let mut rows = Vec::new();
        for object in objects.iter_mut().filter(|o| o.internal_id > 0) {
            match self.row_by_id(object.internal_id)? {
                Some(row) if rows.iter().any(|r: &Arc<ContentRow>| r.id == row.id) => {}
                Some(row) => rows.push(row),
                None => object.mark_missing(),
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let mut batch = StatementBatch::new();
        let owners: Vec<InternalId> = rows
            .iter()
            .filter(|row| self.schema.by_class(row.obj_type(), StorageClass::Filesystem).next().is_some())
            .map(|row| row.id)
            .collect();
        if !owners.is_empty() {
            let filesystem: Vec<String> = rows
                .iter()
                .flat_map(|row| self.schema.by_class(row.obj_type(), StorageClass::Filesystem))
                .map(|a| a.name.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            for chunk in owners.chunks(self.config.batch_size) {
                let attributes = self
                    .backend
                    .attribute_rows(chunk, &filesystem)
                    .during("collecting blobs of", format!("{} objects", chunk.len()))?;
                for attribute in attributes {
                    if let RowValue::File(blob) = attribute.value {
                        batch.remove_blob(blob);
                    }
                }
            }
        }
        for row in &rows {
            batch.push(Statement::DeleteAllAttributes { map_id: row.id });
            batch.push(Statement::DeleteContent { id: row.id });
        }
        self.commit(batch)?;

        let group = self.identity();
        for row in &rows {
            self.cache.invalidate_object(group, row, true);
            self.cache
                .invalidate_attributes(group, row.channelset_id, Some(row.channel_id));
            info!(id = row.id, content_id = %row.content_id, "object deleted");
        }
        self.cache.clear_results(group);
        for object in objects.iter_mut() {
            if rows.iter().any(|row| row.id == object.internal_id) {
                object.mark_missing();
            }
        }
        Ok(rows.len())
    }

    /// Execute a batch as one statement group. Blob removals happen only
    /// if the group commits.
    pub fn commit(&self, batch: StatementBatch) -> DatasourceResult<usize> {
        let (statements, blobs) = batch.into_parts();
        if statements.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock_commits()?;
        match &self.blobs {
            Some(store) => {
                for blob in blobs {
                    store.schedule_removal(blob)?;
                }
            }
            None if !blobs.is_empty() => {
                warn!(count = blobs.len(), "no blob store configured, keeping blob files");
            }
            None => {}
        }

        match self.backend.execute(&statements) {
            Ok(executed) => {
                if let Some(store) = &self.blobs {
                    store.commit_removals();
                }
                debug!(statements = executed, "statement group committed");
                Ok(executed)
            }
            Err(source) => {
                if let Some(store) = &self.blobs {
                    store.discard_removals();
                }
                Err(DatasourceError::Store {
                    operation: "committing",
                    object: format!("{} statements", statements.len()),
                    source,
                })
            }
        }
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    /// Primary rows and generic attribute rows of existing objects, loaded
    /// in chunks.
    #[allow(clippy::type_complexity)]
    fn snapshot(
        &self,
        objects: &[ContentObject],
    ) -> DatasourceResult<(BTreeMap<InternalId, ContentRow>, BTreeMap<InternalId, Vec<AttributeRow>>)> {
        let ids: Vec<InternalId> = objects
            .iter()
            .map(|o| o.internal_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let names: Vec<String> = objects
            .iter()
            .flat_map(|o| {
                o.attribute_names().filter(move |name| {
                    self.schema.get(o.obj_type(), name).is_some_and(|a| {
                        matches!(a.storage_class(), StorageClass::Generic | StorageClass::Filesystem)
                    })
                })
            })
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut rows = BTreeMap::new();
        let mut snapshots: BTreeMap<InternalId, Vec<AttributeRow>> = BTreeMap::new();
        for chunk in ids.chunks(self.config.batch_size) {
            let loaded = self
                .backend
                .content_by_ids(chunk)
                .during("loading update snapshot", format!("{} ids", chunk.len()))?;
            rows.extend(loaded.into_iter().map(|row| (row.id, row)));
            if !names.is_empty() {
                let attributes = self
                    .backend
                    .attribute_rows(chunk, &names)
                    .during("loading update snapshot", format!("{} ids", chunk.len()))?;
                for attribute in attributes {
                    snapshots.entry(attribute.map_id).or_default().push(attribute);
                }
            }
        }
        Ok((rows, snapshots))
    }

    fn plan_update(
        &self,
        object: &ContentObject,
        row: &ContentRow,
        snapshot: &[AttributeRow],
        now: i64,
    ) -> DatasourceResult<UpdatePlan> {
        let mut plan = UpdatePlan::default();
        let mut columns = BTreeMap::new();
        let mut column_owners = BTreeMap::new();

        for (name, values) in object.attributes() {
            let attribute = self.attribute_type(object.obj_type(), name)?;
            match attribute.storage_class() {
                StorageClass::ForeignLink => {}
                StorageClass::Optimized => {
                    let Some(column) = &attribute.quick_column else {
                        continue;
                    };
                    let value = values
                        .first()
                        .map(|v| self.normalizer.to_row(attribute, v))
                        .transpose()?;
                    columns.insert(column.clone(), value);
                    column_owners.insert(column.clone(), name.clone());
                }
                StorageClass::Generic | StorageClass::Filesystem => {
                    let new = self
                        .coerce_all(attribute, values)?
                        .into_iter()
                        .enumerate()
                        .map(|(position, value)| {
                            self.materialize(attribute, row.obj_type(), row.id, position as i32, value)
                        })
                        .collect::<DatasourceResult<Vec<_>>>()?;
                    let old: Vec<AttributeRow> = snapshot
                        .iter()
                        .filter(|r| r.name == *name)
                        .cloned()
                        .collect();
                    let diff = diff_attribute(row.id, name, &old, &new)?;
                    if !diff.is_empty() {
                        debug!(
                            id = row.id,
                            attribute = %name,
                            inserts = diff.insertions(),
                            updates = diff.updates(),
                            deletes = diff.deletions(),
                            "attribute changed"
                        );
                        diff.push_into(&mut plan.batch);
                        plan.changed.push(name.clone());
                    }
                }
            }
        }

        let changed_columns = diff_columns(&row.columns, &columns);
        plan.changed.extend(
            changed_columns
                .keys()
                .filter_map(|column| column_owners.get(column).cloned()),
        );
        plan.content_id_changed = row.content_id != object.content_id;

        if !plan.changed.is_empty() || plan.content_id_changed {
            plan.batch.push(Statement::UpdateContent {
                id: row.id,
                content_id: object.content_id,
                update_timestamp: now,
                columns: changed_columns,
            });
        }
        Ok(plan)
    }

    /// Coerce every value of an attribute. Single-valued attributes keep
    /// only their first value.
    fn coerce_all(&self, attribute: &AttributeType, values: &[AttributeValue]) -> DatasourceResult<Vec<RowValue>> {
        let values = if attribute.multivalue {
            values
        } else {
            &values[..values.len().min(1)]
        };
        values
            .iter()
            .map(|value| self.normalizer.to_row(attribute, value))
            .collect()
    }

    /// Write filesystem-backed values to blob files.
    fn materialize(
        &self,
        attribute: &AttributeType,
        obj_type: ObjectType,
        internal_id: InternalId,
        sort_order: i32,
        value: RowValue,
    ) -> DatasourceResult<RowValue> {
        if attribute.storage_class() != StorageClass::Filesystem {
            return Ok(value);
        }
        let data = match value {
            RowValue::Blob(data) => data,
            RowValue::Text(text) | RowValue::Clob(text) => text.into_bytes(),
            other => {
                return Err(DatasourceError::Coercion {
                    attribute: attribute.name.clone(),
                    kind: attribute.kind,
                    value: other.to_string(),
                })
            }
        };
        let target = BlobTarget::new(obj_type, internal_id, attribute.name.clone(), sort_order);
        Ok(RowValue::File(self.blob_store()?.write(&data, &target)?))
    }
}
