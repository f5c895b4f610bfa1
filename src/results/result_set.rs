use std::sync::Arc;

use super::row::{ColumnLayout, Row};
use crate::error::ResilientDbError;
use crate::types::RowValues;

/// Fully materialized rows of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<Row>,
    /// Column names shared by all rows
    column_names: Arc<Vec<String>>,
}

impl ResultSet {
    /// Build a result set from a cursor's description and fetched raw rows.
    #[must_use]
    pub fn from_raw(description: &[String], raw_rows: Vec<Vec<RowValues>>) -> Self {
        let layout = ColumnLayout::new(description);
        let results = raw_rows.into_iter().map(|raw| layout.row(raw)).collect();
        Self {
            results,
            column_names: Arc::clone(layout.columns()),
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.results.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.results.iter()
    }

    /// Zero rows becomes `None`, one row is unwrapped.
    ///
    /// # Errors
    /// Returns `ResilientDbError::MultipleRows` when there is more than one row; the first row
    /// is never picked silently.
    pub fn into_single(self) -> Result<Option<Row>, ResilientDbError> {
        let count = self.results.len();
        let mut rows = self.results.into_iter();
        match (rows.next(), count) {
            (None, _) => Ok(None),
            (Some(row), 1) => Ok(Some(row)),
            (Some(_), count) => Err(ResilientDbError::MultipleRows { count }),
        }
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
