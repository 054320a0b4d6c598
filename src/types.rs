use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Values bound as statement parameters or scanned out of result rows.
///
/// Every generator and every backend speaks this one enum, so a value read by a
/// `SELECT` can be fed unchanged into a later `UPDATE`:
/// ```rust
/// use sql_loadgen::prelude::*;
///
/// let params = vec![
///     RowValues::Int(42),
///     RowValues::Text("alice".into()),
///     RowValues::Null,
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum RowValues {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Timestamp(NaiveDateTime),
    #[default]
    Null,
    JSON(JsonValue),
    Blob(Vec<u8>),
}

impl RowValues {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RowValues::Int(value) => Some(*value),
            RowValues::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_string())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

/// Outcome of a statement that does not yield rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Auto-generated identifier of the last inserted row, when the driver reports one.
    pub last_insert_id: Option<i64>,
}

/// Database engines with a built-in [`ConnectionSource`](crate::backend::ConnectionSource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `SQLite` database file
    #[cfg(feature = "sqlite")]
    Sqlite,
    /// `PostgreSQL` server
    #[cfg(feature = "postgres")]
    Postgres,
}
