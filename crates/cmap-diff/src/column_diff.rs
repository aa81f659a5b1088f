//! Diff of optimized columns on the primary row.

use std::collections::BTreeMap;

use cmap_store::RowValue;

/// Compute the optimized columns that changed.
///
/// `new` holds the columns the object sets now, `None` meaning NULL. Columns
/// missing from `new` are left untouched. The result maps each changed
/// column to its new value and is what an `UpdateContent` statement carries.
pub fn diff_columns(
    old: &BTreeMap<String, RowValue>,
    new: &BTreeMap<String, Option<RowValue>>,
) -> BTreeMap<String, Option<RowValue>> {
    new.iter()
        .filter(|&(column, value)| old.get(column) != Option::as_ref(value))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}
