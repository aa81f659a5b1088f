use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;
use crate::ObjectType;

/// Channel-independent external identifier of a content object.
///
/// A `ContentId` pairs an object type with an object id and has the canonical
/// string form `"{obj_type}.{obj_id}"`. It is unique only within one channel:
/// a localized variant may carry a different `obj_id` than its ancestor, and
/// the two are tied together by their channelset id instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId {
    obj_type: ObjectType,
    obj_id: i64,
}

impl ContentId {
    /// Create a content id from its two halves.
    pub const fn new(obj_type: ObjectType, obj_id: i64) -> Self {
        Self { obj_type, obj_id }
    }

    /// The object type half.
    pub fn obj_type(&self) -> ObjectType {
        self.obj_type
    }

    /// The object id half.
    pub fn obj_id(&self) -> i64 {
        self.obj_id
    }

    /// Re-generate this id after channel fallback found the object under a
    /// different object id. Returns the previous object id.
    pub fn regenerate(&mut self, obj_id: i64) -> i64 {
        std::mem::replace(&mut self.obj_id, obj_id)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({}.{})", self.obj_type, self.obj_id)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.obj_type, self.obj_id)
    }
}

impl FromStr for ContentId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidContentId(s.to_string());
        let (obj_type, obj_id) = s.trim().split_once('.').ok_or_else(invalid)?;
        let obj_type = obj_type.parse().map_err(|_| invalid())?;
        let obj_id = obj_id.parse().map_err(|_| invalid())?;
        Ok(Self { obj_type, obj_id })
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
