use std::collections::HashMap;
use std::ops::Index;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::ResilientDbError;
use crate::types::RowValues;

/// Column layout shared by every row of one result set.
///
/// Raw driver columns may repeat a name (`SELECT 1 AS a, 2 AS a`); the layout collapses
/// repeats onto the first position so keys stay unique, and the later value wins.
#[derive(Debug, Clone)]
pub(crate) struct ColumnLayout {
    columns: Arc<Vec<String>>,
    index: Arc<HashMap<String, usize>>,
    /// For each raw column, the slot it lands in.
    slots: Vec<usize>,
}

impl ColumnLayout {
    pub(crate) fn new<S: AsRef<str>>(raw_columns: &[S]) -> Self {
        let mut columns = Vec::with_capacity(raw_columns.len());
        let mut index = HashMap::with_capacity(raw_columns.len());
        let mut slots = Vec::with_capacity(raw_columns.len());

        for name in raw_columns {
            let name = name.as_ref();
            let slot = *index.entry(name.to_string()).or_insert_with(|| {
                columns.push(name.to_string());
                columns.len() - 1
            });
            slots.push(slot);
        }

        Self {
            columns: Arc::new(columns),
            index: Arc::new(index),
            slots,
        }
    }

    pub(crate) fn columns(&self) -> &Arc<Vec<String>> {
        &self.columns
    }

    /// Build a row from raw driver values, positionally matched to the raw columns.
    pub(crate) fn row(&self, raw_values: Vec<RowValues>) -> Row {
        let mut values = vec![RowValues::Null; self.columns.len()];
        for (value, &slot) in raw_values.into_iter().zip(&self.slots) {
            values[slot] = value;
        }
        Row {
            columns: Arc::clone(&self.columns),
            values,
            index: Arc::clone(&self.index),
        }
    }
}

/// One materialized result row: an ordered map from column name to value.
///
/// Values are reachable by key (`row["name"]`, panics like a map index when absent), by
/// [`Row::get`] (returns `Option`), and by the named-field accessor [`Row::field`], which
/// fails with `FieldNotFound` instead of returning a default.
///
/// ```rust
/// use resilient_sql::prelude::*;
///
/// let row = Row::new(
///     vec!["id".into(), "name".into()],
///     vec![RowValues::Int(1), RowValues::Text("a".into())],
/// );
/// assert_eq!(row["name"], RowValues::Text("a".into()));
/// assert_eq!(row.field("name").unwrap(), &row["name"]);
/// assert!(row.field("email").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<RowValues>,
    index: Arc<HashMap<String, usize>>,
}

impl Row {
    /// Build a row by pairing `columns` with `values` positionally.
    ///
    /// Pairs beyond the shorter of the two are dropped; a repeated column name keeps its first
    /// position and takes the later value.
    #[must_use]
    pub fn new(columns: Vec<String>, values: Vec<RowValues>) -> Self {
        let paired = columns.len().min(values.len());
        let layout = ColumnLayout::new(&columns[..paired]);
        layout.row(values.into_iter().take(paired).collect())
    }

    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.index.get(column_name).copied()
    }

    /// Get a value by column name.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Named-field access.
    ///
    /// # Errors
    /// Returns `ResilientDbError::FieldNotFound` when the row has no such column.
    pub fn field(&self, name: &str) -> Result<&RowValues, ResilientDbError> {
        self.get(name)
            .ok_or_else(|| ResilientDbError::FieldNotFound(name.to_string()))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn contains_key(&self, column_name: &str) -> bool {
        self.index.contains_key(column_name)
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn values(&self) -> &[RowValues] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(column, value)` pairs in result-set order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValues)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.values == other.values
    }
}

impl Index<&str> for Row {
    type Output = RowValues;

    fn index(&self, column_name: &str) -> &RowValues {
        match self.get(column_name) {
            Some(value) => value,
            None => panic!("no column named {column_name:?} in row"),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}
