//! Row representation for query results.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column index.
    pub index: usize,
}

impl Column {
    /// Build column metadata for a list of names, in order.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Arc<[Column]>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .enumerate()
            .map(|(index, name)| Column {
                name: name.into(),
                index,
            })
            .collect()
    }
}

/// A row from a query result.
///
/// Column metadata is shared between all rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row from columns and values.
    #[must_use]
    pub fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Get a value by column index.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        self.values
            .get(index)
            .ok_or(Error::ColumnIndex {
                index,
                len: self.values.len(),
            })
            .and_then(T::from_value)
    }

    /// Get a value by column name (case-insensitive).
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self
            .position(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        self.get(index)
    }

    /// Try to get a value by column index, returning None if NULL or not found.
    pub fn try_get<T: FromValue>(&self, index: usize) -> Option<T> {
        self.values
            .get(index)
            .and_then(|v| T::from_value_nullable(v).ok().flatten())
    }

    /// Try to get a value by column name, returning None if NULL or not found.
    pub fn try_get_by_name<T: FromValue>(&self, name: &str) -> Option<T> {
        self.try_get(self.position(name)?)
    }

    /// Get the raw value by index.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get the number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Iterate over (column, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Value)> {
        self.columns.iter().zip(self.values.iter())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Number of rows changed by the statement.
    pub rows_affected: u64,
    /// Identifier generated by the statement, if the backend reports one.
    pub last_insert_id: Option<i64>,
}
