//! The attribute schema: read-mostly metadata loaded once per datasource.

use std::collections::BTreeMap;

use crate::attribute::{AttributeType, StorageClass};
use crate::error::TypeError;
use crate::ObjectType;

/// All attribute types known to a datasource, keyed by object type and name.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    types: BTreeMap<(ObjectType, String), AttributeType>,
}

impl Schema {
    /// Build a schema, rejecting duplicate `(object_type, name)` pairs.
    pub fn new(types: impl IntoIterator<Item = AttributeType>) -> Result<Self, TypeError> {
        let mut map = BTreeMap::new();
        for attr in types {
            let key = (attr.object_type, attr.name.clone());
            if map.contains_key(&key) {
                return Err(TypeError::DuplicateAttribute {
                    object_type: attr.object_type,
                    name: attr.name,
                });
            }
            map.insert(key, attr);
        }
        Ok(Self { types: map })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Look up an attribute type.
    pub fn get(&self, object_type: ObjectType, name: &str) -> Option<&AttributeType> {
        self.types.get(&(object_type, name.to_string()))
    }

    /// Look up an attribute type, failing for unknown names.
    pub fn attribute(&self, object_type: ObjectType, name: &str) -> Result<&AttributeType, TypeError> {
        self.get(object_type, name)
            .ok_or_else(|| TypeError::UnknownAttribute {
                object_type,
                name: name.to_string(),
            })
    }

    /// All attributes of one object type, in name order.
    pub fn attributes(&self, object_type: ObjectType) -> impl Iterator<Item = &AttributeType> {
        self.types
            .range((object_type, String::new())..)
            .take_while(move |((t, _), _)| *t == object_type)
            .map(|(_, attr)| attr)
    }

    /// Attributes of one object type in the given storage class.
    pub fn by_class(
        &self,
        object_type: ObjectType,
        class: StorageClass,
    ) -> impl Iterator<Item = &AttributeType> {
        self.attributes(object_type)
            .filter(move |attr| attr.storage_class() == class)
    }

    /// Optimized attributes of one object type.
    pub fn optimized(&self, object_type: ObjectType) -> Vec<&AttributeType> {
        self.by_class(object_type, StorageClass::Optimized).collect()
    }

    /// Attributes of the given name across all object types.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a AttributeType> + 'a {
        self.types.values().filter(move |attr| attr.name == name)
    }
}
