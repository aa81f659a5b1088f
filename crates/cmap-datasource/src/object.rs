use std::collections::BTreeMap;

use cmap_store::ContentRow;
use cmap_types::{AttributeValue, ChannelId, ChannelsetId, ContentId, InternalId, ObjectType};

/// Marker for an object that resolution found to not exist.
pub const MISSING: InternalId = -1;

/// One channel variant of a content object as seen by callers.
///
/// `internal_id` is positive once persisted, zero before resolution and
/// [`MISSING`] when resolution found no variant. Attribute values held here
/// are the object's current state: whatever was loaded plus whatever the
/// caller set. Only attributes present in the map are written back.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentObject {
    pub internal_id: InternalId,
    pub channel_id: ChannelId,
    pub channelset_id: ChannelsetId,
    pub content_id: ContentId,
    /// Object id the caller asked for when resolution surfaced a variant
    /// with a different content id.
    pub stored_object_id: Option<i64>,
    pub update_timestamp: i64,
    attributes: BTreeMap<String, Vec<AttributeValue>>,
}

impl ContentObject {
    /// A new, unresolved object.
    pub fn new(content_id: ContentId) -> Self {
        Self {
            internal_id: 0,
            channel_id: 0,
            channelset_id: 0,
            content_id,
            stored_object_id: None,
            update_timestamp: 0,
            attributes: BTreeMap::new(),
        }
    }

    /// Place the object in a channel.
    pub fn in_channel(mut self, channel: ChannelId) -> Self {
        self.channel_id = channel;
        self
    }

    /// Make this object a variant of an existing channelset.
    pub fn with_channelset(mut self, channelset: ChannelsetId) -> Self {
        self.channelset_id = channelset;
        self
    }

    /// Set a single-valued attribute.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, vec![value.into()]);
        self
    }

    pub(crate) fn from_row(row: &ContentRow) -> Self {
        Self {
            internal_id: row.id,
            channel_id: row.channel_id,
            channelset_id: row.channelset_id,
            content_id: row.content_id,
            stored_object_id: None,
            update_timestamp: row.update_timestamp,
            attributes: BTreeMap::new(),
        }
    }

    /// Take over identity fields from a persisted row, keeping attributes.
    pub(crate) fn adopt_row(&mut self, row: &ContentRow) {
        self.internal_id = row.id;
        self.channel_id = row.channel_id;
        self.channelset_id = row.channelset_id;
        self.update_timestamp = row.update_timestamp;
        if row.content_id != self.content_id {
            let previous = self.content_id.regenerate(row.obj_id());
            self.stored_object_id = Some(previous);
        }
    }

    pub(crate) fn mark_missing(&mut self) {
        self.internal_id = MISSING;
    }

    /// Whether the object is known to be persisted.
    pub fn exists(&self) -> bool {
        self.internal_id > 0
    }

    /// Object type from the content id.
    pub fn obj_type(&self) -> ObjectType {
        self.content_id.obj_type()
    }

    /// Replace all values of an attribute.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<AttributeValue>) {
        self.attributes.insert(name.into(), values);
    }

    /// Replace an attribute with a single value.
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.set(name, vec![value.into()]);
    }

    /// Clear an attribute; it is written back as empty.
    pub fn clear(&mut self, name: impl Into<String>) {
        self.set(name, Vec::new());
    }

    /// Forget an attribute; it is neither written nor considered loaded.
    pub fn unload(&mut self, name: &str) -> Option<Vec<AttributeValue>> {
        self.attributes.remove(name)
    }

    /// Values held for an attribute, `None` if not loaded or set.
    pub fn values(&self, name: &str) -> Option<&[AttributeValue]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// First value of an attribute.
    pub fn value(&self, name: &str) -> Option<&AttributeValue> {
        self.values(name).and_then(<[AttributeValue]>::first)
    }

    /// Whether values for the attribute are held, even an empty list.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub(crate) fn attributes(&self) -> &BTreeMap<String, Vec<AttributeValue>> {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_object_is_unresolved() {
        let object = ContentObject::new(ContentId::new(1, 100));
        assert_eq!(object.internal_id, 0);
        assert!(!object.exists());
        assert_eq!(object.obj_type(), 1);
    }

    #[test]
    fn adopt_row_records_divergent_id() {
        let mut row = ContentRow::new(ContentId::new(1, 200), 2, 42);
        row.id = 7;
        let mut object = ContentObject::new(ContentId::new(1, 100));
        object.adopt_row(&row);
        assert_eq!(object.internal_id, 7);
        assert_eq!(object.content_id.to_string(), "1.200");
        assert_eq!(object.stored_object_id, Some(100));
    }

    #[test]
    fn adopt_row_same_id_records_nothing() {
        let mut row = ContentRow::new(ContentId::new(1, 100), 1, 42);
        row.id = 3;
        let mut object = ContentObject::new(ContentId::new(1, 100));
        object.adopt_row(&row);
        assert_eq!(object.stored_object_id, None);
    }

    #[test]
    fn attribute_access() {
        let mut object = ContentObject::new(ContentId::new(1, 1)).with("title", "Hello");
        assert_eq!(object.value("title").and_then(AttributeValue::as_text), Some("Hello"));
        object.clear("title");
        assert_eq!(object.values("title"), Some(&[][..]));
        assert!(object.has("title"));
        object.unload("title");
        assert!(!object.has("title"));
        assert_eq!(object.values("title"), None);
    }
}
