//! Cached attribute payloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use cmap_types::AttributeValue;

/// A cached attribute value.
///
/// `Null` records a known absence and is distinct from a cache miss, which
/// is represented by the lookup returning `None`.
#[derive(Clone, Debug, PartialEq)]
pub enum CachedAttribute {
    Null,
    Scalar(Arc<AttributeValue>),
    Multi(Arc<[Arc<AttributeValue>]>),
}

impl CachedAttribute {
    /// Build from loaded values: none is `Null`, one is a scalar.
    pub fn from_values(mut values: Vec<AttributeValue>) -> Self {
        match values.len() {
            0 => Self::Null,
            1 => Self::Scalar(Arc::new(values.remove(0))),
            _ => Self::Multi(values.into_iter().map(Arc::new).collect()),
        }
    }

    /// Materialize as owned values. `Null` yields an empty list.
    pub fn to_values(&self) -> Vec<AttributeValue> {
        match self {
            Self::Null => Vec::new(),
            Self::Scalar(v) => vec![(**v).clone()],
            Self::Multi(vs) => vs.iter().map(|v| (**v).clone()).collect(),
        }
    }

    /// Whether this is the cached "no value" marker.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn shared(&self) -> std::slice::Iter<'_, Arc<AttributeValue>> {
        match self {
            Self::Null => <&[Arc<AttributeValue>]>::default().iter(),
            Self::Scalar(v) => std::slice::from_ref(v).iter(),
            Self::Multi(vs) => vs.iter(),
        }
    }
}

/// All cached attributes of one object variant, by attribute name.
///
/// Equal values inside a bag share one allocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeBag {
    values: BTreeMap<String, CachedAttribute>,
}

impl AttributeBag {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached values of one attribute.
    pub fn get(&self, name: &str) -> Option<&CachedAttribute> {
        self.values.get(name)
    }

    /// Store a value, reusing allocations of equal values already present.
    pub fn insert(&mut self, name: impl Into<String>, value: CachedAttribute) {
        let value = match value {
            CachedAttribute::Null => CachedAttribute::Null,
            CachedAttribute::Scalar(v) => CachedAttribute::Scalar(self.intern(v)),
            CachedAttribute::Multi(vs) => {
                CachedAttribute::Multi(vs.iter().map(|v| self.intern(v.clone())).collect())
            }
        };
        self.values.insert(name.into(), value);
    }

    /// Forget one attribute.
    pub fn remove(&mut self, name: &str) -> Option<CachedAttribute> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Names of all cached attributes.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn intern(&self, value: Arc<AttributeValue>) -> Arc<AttributeValue> {
        self.values
            .values()
            .flat_map(CachedAttribute::shared)
            .find(|existing| ***existing == *value)
            .cloned()
            .unwrap_or(value)
    }
}
