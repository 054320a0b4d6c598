use std::sync::Arc;

use crate::types::RowValues;

/// Rows returned by a result-set statement.
///
/// Column names are shared by every row; values are positional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    column_names: Arc<Vec<String>>,
    rows: Vec<Vec<RowValues>>,
}

impl ResultSet {
    #[must_use]
    pub fn new(column_names: Vec<String>) -> Self {
        Self {
            column_names: Arc::new(column_names),
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_capacity(column_names: Vec<String>, capacity: usize) -> Self {
        Self {
            column_names: Arc::new(column_names),
            rows: Vec::with_capacity(capacity),
        }
    }

    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        self.rows.push(row_values);
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<RowValues>] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at `column_name` in row `row`, if both exist.
    #[must_use]
    pub fn get(&self, row: usize, column_name: &str) -> Option<&RowValues> {
        let idx = self.column_names.iter().position(|c| c == column_name)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}
