//! Coercion between attribute values and stored column values.

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use cmap_store::RowValue;
use cmap_types::{AttributeKind, AttributeType, AttributeValue, ContentId};

use crate::error::{DatasourceError, DatasourceResult};

/// Converts values by declared attribute kind.
#[derive(Clone, Copy, Debug)]
pub struct Normalizer {
    text_length_cap: usize,
}

impl Normalizer {
    /// A normalizer truncating `Text` values to `text_length_cap` characters.
    pub fn new(text_length_cap: usize) -> Self {
        Self { text_length_cap }
    }

    /// Coerce a value for storage. Fails on values that do not fit the
    /// kind. Filesystem-backed values are returned as `Blob` and written to
    /// files by the caller.
    pub fn to_row(&self, attribute: &AttributeType, value: &AttributeValue) -> DatasourceResult<RowValue> {
        let mismatch = || DatasourceError::Coercion {
            attribute: attribute.name.clone(),
            kind: attribute.kind,
            value: value.to_string(),
        };
        let row = match (attribute.kind, value) {
            (AttributeKind::Text, v) => RowValue::Text(self.truncate(attribute, text_of(v).ok_or_else(mismatch)?)),
            (AttributeKind::LongText, v) => RowValue::Clob(text_of(v).ok_or_else(mismatch)?),
            (AttributeKind::Binary, AttributeValue::Binary(b)) => RowValue::Blob(b.clone()),
            (AttributeKind::Binary, AttributeValue::Text(s)) => RowValue::Blob(s.as_bytes().to_vec()),
            (AttributeKind::Integer, v) => {
                let n = integer_of(v).ok_or_else(mismatch)?;
                RowValue::Int(i32::try_from(n).map_err(|_| mismatch())?)
            }
            (AttributeKind::Long, v) => RowValue::Long(integer_of(v).ok_or_else(mismatch)?),
            (AttributeKind::Double, AttributeValue::Double(d)) => RowValue::Double(*d),
            (AttributeKind::Double, AttributeValue::Text(s)) => {
                RowValue::Double(s.trim().parse().map_err(|_| mismatch())?)
            }
            (AttributeKind::Double, v) => RowValue::Double(v.as_i64().ok_or_else(mismatch)? as f64),
            (AttributeKind::Date, AttributeValue::Date(d)) => RowValue::Date(*d),
            (AttributeKind::Date, AttributeValue::Long(millis)) => {
                RowValue::Date(Utc.timestamp_millis_opt(*millis).single().ok_or_else(mismatch)?)
            }
            (AttributeKind::Date, AttributeValue::Text(s)) => RowValue::Date(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|_| mismatch())?
                    .with_timezone(&Utc),
            ),
            (AttributeKind::Link, AttributeValue::Link(id)) => RowValue::Text(id.to_string()),
            (AttributeKind::Link, AttributeValue::Text(s)) => {
                RowValue::Text(s.parse::<ContentId>().map_err(|_| mismatch())?.to_string())
            }
            _ => return Err(mismatch()),
        };
        Ok(row)
    }

    /// Re-hydrate a stored value. File references are resolved by the
    /// caller before this point.
    pub fn from_row(&self, attribute: &AttributeType, row: &RowValue) -> DatasourceResult<AttributeValue> {
        let mismatch = || DatasourceError::Coercion {
            attribute: attribute.name.clone(),
            kind: attribute.kind,
            value: row.to_string(),
        };
        let value = match (attribute.kind, row) {
            (AttributeKind::Text | AttributeKind::LongText, RowValue::Text(s) | RowValue::Clob(s)) => {
                AttributeValue::Text(s.clone())
            }
            (AttributeKind::Binary, RowValue::Blob(b)) => AttributeValue::Binary(b.clone()),
            (AttributeKind::Integer, RowValue::Int(n)) => AttributeValue::Integer(*n),
            (AttributeKind::Long, RowValue::Long(n)) => AttributeValue::Long(*n),
            (AttributeKind::Long, RowValue::Int(n)) => AttributeValue::Long(i64::from(*n)),
            (AttributeKind::Double, RowValue::Double(d)) => AttributeValue::Double(*d),
            (AttributeKind::Date, RowValue::Date(d)) => AttributeValue::Date(*d),
            (AttributeKind::Link, RowValue::Text(s)) => {
                AttributeValue::Link(s.parse().map_err(|_| mismatch())?)
            }
            _ => return Err(mismatch()),
        };
        Ok(value)
    }

    /// Read coercion that degrades to `None` with a warning.
    pub fn from_row_lossy(&self, attribute: &AttributeType, row: &RowValue) -> Option<AttributeValue> {
        match self.from_row(attribute, row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(attribute = %attribute.name, error = %e, "dropping unreadable value");
                None
            }
        }
    }

    fn truncate(&self, attribute: &AttributeType, text: String) -> String {
        match text.char_indices().nth(self.text_length_cap) {
            Some((cut, _)) => {
                warn!(
                    attribute = %attribute.name,
                    length = text.chars().count(),
                    cap = self.text_length_cap,
                    "truncating text value"
                );
                text[..cut].to_string()
            }
            None => text,
        }
    }
}

fn integer_of(value: &AttributeValue) -> Option<i64> {
    match value {
        AttributeValue::Text(s) => s.trim().parse().ok(),
        other => other.as_i64(),
    }
}

fn text_of(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::Text(s) => Some(s.clone()),
        AttributeValue::Binary(_) => None,
        other => Some(other.to_string()),
    }
}
