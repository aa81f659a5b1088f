use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use cmap_types::{ChannelId, ChannelsetId, ContentId, InternalId};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::expression::Expression;
use crate::row::{AttributeRow, ChannelRow, ContentRow};
use crate::statement::Statement;
use crate::traits::Backend;

type AttributeKey = (InternalId, String, i32);

#[derive(Clone, Default)]
struct Tables {
    channels: BTreeMap<ChannelId, ChannelRow>,
    content: BTreeMap<InternalId, ContentRow>,
    attributes: BTreeMap<AttributeKey, AttributeRow>,
    next_content_id: InternalId,
    next_attribute_id: i64,
    last_update: i64,
}

/// In-memory, `BTreeMap`-based backend.
///
/// Intended for tests and embedding. Tables live behind one `RwLock`;
/// statement groups are applied to a copy and swapped in, which makes them
/// atomic. Every executed statement is appended to a journal and every read
/// is counted so tests can assert on backend traffic.
pub struct InMemoryBackend {
    identity: String,
    tables: RwLock<Tables>,
    journal: RwLock<Vec<Statement>>,
    reads: AtomicUsize,
    executions: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty backend with the given datasource identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            tables: RwLock::new(Tables {
                next_content_id: 1,
                next_attribute_id: 1,
                ..Tables::default()
            }),
            journal: RwLock::new(Vec::new()),
            reads: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Statements executed so far, in order.
    pub fn journal(&self) -> Vec<Statement> {
        self.journal.read().map(|j| j.clone()).unwrap_or_default()
    }

    /// Forget the statement journal.
    pub fn clear_journal(&self) {
        if let Ok(mut journal) = self.journal.write() {
            journal.clear();
        }
    }

    /// Number of read calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of statement groups committed so far.
    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of primary rows.
    pub fn content_len(&self) -> usize {
        self.tables.read().map(|t| t.content.len()).unwrap_or(0)
    }

    /// Number of generic attribute rows.
    pub fn attribute_len(&self) -> usize {
        self.tables.read().map(|t| t.attributes.len()).unwrap_or(0)
    }

    /// Force the update timestamp of a primary row.
    pub fn touch(&self, id: InternalId, timestamp: i64) -> StoreResult<()> {
        let mut tables = self.write_tables()?;
        let row = tables.content.get_mut(&id).ok_or_else(|| StoreError::MissingRow {
            table: "contentmap",
            key: id.to_string(),
        })?;
        row.update_timestamp = timestamp;
        tables.last_update = tables.last_update.max(timestamp);
        Ok(())
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(self.identity.clone()));
        }
        Ok(())
    }

    fn read_tables(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.tables
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write_tables(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.check()?;
        self.tables
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn in_channels(row: &ContentRow, channels: &[ChannelId]) -> bool {
        channels.is_empty() || channels.contains(&row.channel_id)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl Tables {
    fn apply(&mut self, statement: &Statement) -> StoreResult<()> {
        match statement {
            Statement::UpdateContent {
                id,
                content_id,
                update_timestamp,
                columns,
            } => {
                let row = self.content.get_mut(id).ok_or_else(|| StoreError::MissingRow {
                    table: "contentmap",
                    key: id.to_string(),
                })?;
                row.content_id = *content_id;
                row.update_timestamp = *update_timestamp;
                for (column, value) in columns {
                    match value {
                        Some(v) => {
                            row.columns.insert(column.clone(), v.clone());
                        }
                        None => {
                            row.columns.remove(column);
                        }
                    }
                }
                self.last_update = self.last_update.max(*update_timestamp);
            }
            Statement::DeleteContent { id } => {
                self.content.remove(id);
            }
            Statement::InsertAttribute {
                map_id,
                name,
                sort_order,
                value,
            } => {
                let key = (*map_id, name.clone(), *sort_order);
                if self.attributes.contains_key(&key) {
                    return Err(StoreError::DuplicateRow {
                        table: "contentattribute",
                        key: format!("{map_id}/{name}/{sort_order}"),
                    });
                }
                let id = self.next_attribute_id;
                self.next_attribute_id += 1;
                self.attributes.insert(
                    key,
                    AttributeRow {
                        id,
                        map_id: *map_id,
                        name: name.clone(),
                        sort_order: *sort_order,
                        value: value.clone(),
                        update_timestamp: self.last_update,
                    },
                );
            }
            Statement::UpdateAttribute {
                map_id,
                name,
                sort_order,
                value,
            } => {
                let key = (*map_id, name.clone(), *sort_order);
                let row = self
                    .attributes
                    .get_mut(&key)
                    .ok_or_else(|| StoreError::MissingRow {
                        table: "contentattribute",
                        key: format!("{map_id}/{name}/{sort_order}"),
                    })?;
                row.value = value.clone();
            }
            Statement::DeleteAttribute {
                map_id,
                name,
                sort_order,
            } => {
                self.attributes.remove(&(*map_id, name.clone(), *sort_order));
            }
            Statement::DeleteAllAttributes { map_id } => {
                self.attributes.retain(|(owner, _, _), _| owner != map_id);
            }
            Statement::UpsertChannel(row) => {
                self.channels.insert(row.id, row.clone());
            }
            Statement::DeleteChannel { id } => {
                self.channels.remove(id);
            }
        }
        Ok(())
    }

    fn attributes_of(&self, map_id: InternalId) -> Vec<AttributeRow> {
        self.attributes
            .range((map_id, String::new(), i32::MIN)..)
            .take_while(|((owner, _, _), _)| *owner == map_id)
            .map(|(_, row)| row.clone())
            .collect()
    }
}

impl Backend for InMemoryBackend {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn load_channels(&self) -> StoreResult<Vec<ChannelRow>> {
        let tables = self.read_tables()?;
        let mut rows: Vec<ChannelRow> = tables.channels.values().cloned().collect();
        rows.sort_by_key(|r| r.left);
        Ok(rows)
    }

    fn content_by_id(&self, id: InternalId) -> StoreResult<Option<ContentRow>> {
        let tables = self.read_tables()?;
        Ok(tables.content.get(&id).cloned())
    }

    fn content_by_ids(&self, ids: &[InternalId]) -> StoreResult<Vec<ContentRow>> {
        let tables = self.read_tables()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.content.get(id).cloned())
            .collect())
    }

    fn content_by_channelset(
        &self,
        channelset_id: ChannelsetId,
        channels: &[ChannelId],
    ) -> StoreResult<Vec<ContentRow>> {
        let tables = self.read_tables()?;
        Ok(tables
            .content
            .values()
            .filter(|r| r.channelset_id == channelset_id && Self::in_channels(r, channels))
            .cloned()
            .collect())
    }

    fn content_by_channelsets(
        &self,
        channelset_ids: &[ChannelsetId],
        channels: &[ChannelId],
    ) -> StoreResult<Vec<ContentRow>> {
        let tables = self.read_tables()?;
        Ok(tables
            .content
            .values()
            .filter(|r| channelset_ids.contains(&r.channelset_id) && Self::in_channels(r, channels))
            .cloned()
            .collect())
    }

    fn content_by_content_id(
        &self,
        content_id: &ContentId,
        channels: &[ChannelId],
    ) -> StoreResult<Vec<ContentRow>> {
        let tables = self.read_tables()?;
        Ok(tables
            .content
            .values()
            .filter(|r| r.content_id == *content_id && Self::in_channels(r, channels))
            .cloned()
            .collect())
    }

    fn attribute_rows(
        &self,
        map_ids: &[InternalId],
        names: &[String],
    ) -> StoreResult<Vec<AttributeRow>> {
        let tables = self.read_tables()?;
        let mut owners = map_ids.to_vec();
        owners.sort_unstable();
        owners.dedup();
        let mut rows = Vec::new();
        for owner in owners {
            rows.extend(
                tables
                    .attributes_of(owner)
                    .into_iter()
                    .filter(|r| names.is_empty() || names.contains(&r.name)),
            );
        }
        Ok(rows)
    }

    fn modified_since(&self, channel: ChannelId, since: i64) -> StoreResult<Vec<ContentRow>> {
        let tables = self.read_tables()?;
        Ok(tables
            .content
            .values()
            .filter(|r| r.channel_id == channel && r.update_timestamp > since)
            .cloned()
            .collect())
    }

    fn last_update(&self) -> StoreResult<i64> {
        let tables = self.read_tables()?;
        Ok(tables.last_update)
    }

    fn query(&self, expression: &Expression, channels: &[ChannelId]) -> StoreResult<Vec<ContentRow>> {
        let tables = self.read_tables()?;
        Ok(tables
            .content
            .values()
            .filter(|r| Self::in_channels(r, channels))
            .filter(|r| expression.matches(r, &tables.attributes_of(r.id)))
            .cloned()
            .collect())
    }

    fn insert_content(&self, row: &ContentRow) -> StoreResult<ContentRow> {
        let mut tables = self.write_tables()?;
        let duplicate = tables
            .content
            .values()
            .any(|r| r.channel_id == row.channel_id && r.content_id == row.content_id);
        if duplicate {
            return Err(StoreError::DuplicateRow {
                table: "contentmap",
                key: format!("{}@{}", row.content_id, row.channel_id),
            });
        }
        let mut inserted = row.clone();
        inserted.id = tables.next_content_id;
        tables.next_content_id += 1;
        if inserted.channelset_id == 0 {
            // Generated channelset ids are the row id of the first variant.
            inserted.channelset_id = inserted.id as ChannelsetId;
        }
        tables.last_update = tables.last_update.max(inserted.update_timestamp);
        tables.content.insert(inserted.id, inserted.clone());
        debug!(id = inserted.id, content_id = %inserted.content_id, "inserted content row");
        Ok(inserted)
    }

    fn execute(&self, statements: &[Statement]) -> StoreResult<usize> {
        let mut tables = self.write_tables()?;
        let mut staged = tables.clone();
        for statement in statements {
            staged.apply(statement)?;
        }
        *tables = staged;
        drop(tables);
        self.executions.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut journal) = self.journal.write() {
            journal.extend(statements.iter().cloned());
        }
        debug!(count = statements.len(), "executed statement group");
        Ok(statements.len())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("identity", &self.identity)
            .field("content_rows", &self.content_len())
            .field("attribute_rows", &self.attribute_len())
            .finish()
    }
}
