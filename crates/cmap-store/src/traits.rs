use cmap_types::{ChannelId, ChannelsetId, ContentId, InternalId};

use crate::error::StoreResult;
use crate::expression::Expression;
use crate::row::{AttributeRow, ChannelRow, ContentRow};
use crate::statement::Statement;

/// The relational store behind one datasource.
///
/// All implementations must satisfy these invariants:
/// - A statement group passed to [`execute`](Backend::execute) is applied
///   atomically: either every statement takes effect or none does.
/// - [`attribute_rows`](Backend::attribute_rows) returns rows ordered by
///   owning id, name and sort order so callers can stream over them.
/// - A channel list restricts rows to those channels. An empty list means
///   "any channel".
/// - All I/O errors are propagated, never silently ignored.
pub trait Backend: Send + Sync {
    /// Channel-unaware identity of this datasource. Used as cache group.
    fn identity(&self) -> &str;

    /// All channel rows ordered by left boundary.
    fn load_channels(&self) -> StoreResult<Vec<ChannelRow>>;

    /// Point lookup of a primary row.
    fn content_by_id(&self, id: InternalId) -> StoreResult<Option<ContentRow>>;

    /// Primary rows for many ids. Missing ids are skipped.
    fn content_by_ids(&self, ids: &[InternalId]) -> StoreResult<Vec<ContentRow>>;

    /// All variants of a channelset in the given channels.
    fn content_by_channelset(
        &self,
        channelset_id: ChannelsetId,
        channels: &[ChannelId],
    ) -> StoreResult<Vec<ContentRow>>;

    /// All variants of many channelsets in the given channels.
    fn content_by_channelsets(
        &self,
        channelset_ids: &[ChannelsetId],
        channels: &[ChannelId],
    ) -> StoreResult<Vec<ContentRow>>;

    /// All rows carrying a content id in the given channels.
    fn content_by_content_id(
        &self,
        content_id: &ContentId,
        channels: &[ChannelId],
    ) -> StoreResult<Vec<ContentRow>>;

    /// Generic attribute rows for the given owners and names, ordered by
    /// owner, name and sort order. An empty name list means all names.
    fn attribute_rows(
        &self,
        map_ids: &[InternalId],
        names: &[String],
    ) -> StoreResult<Vec<AttributeRow>>;

    /// Rows of one channel updated strictly after `since`.
    fn modified_since(&self, channel: ChannelId, since: i64) -> StoreResult<Vec<ContentRow>>;

    /// Latest update timestamp of any row.
    fn last_update(&self) -> StoreResult<i64>;

    /// Rows in the given channels matching the expression.
    fn query(&self, expression: &Expression, channels: &[ChannelId]) -> StoreResult<Vec<ContentRow>>;

    /// Insert a primary row and return it with its generated id. A zero
    /// channelset id is replaced by the generated id.
    fn insert_content(&self, row: &ContentRow) -> StoreResult<ContentRow>;

    /// Apply a statement group atomically. Returns the number of statements.
    fn execute(&self, statements: &[Statement]) -> StoreResult<usize>;
}
