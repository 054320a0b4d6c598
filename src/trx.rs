//! Statements of a workload and the row budgets that may limit them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::ReadConnection;
use crate::types::RowValues;

/// Position of a statement relative to a logical (finch) trx.
///
/// This is the statistics scope of the workload, not a database transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrxBoundary {
    #[default]
    None,
    Begin,
    End,
}

/// Limits the total rows written by one or more statements, possibly across clients.
#[async_trait]
pub trait RowLimit: Send + Sync {
    /// Checked before each write with the client's live connection; `false`
    /// stops the client cleanly.
    async fn more(&self, conn: &mut dyn ReadConnection) -> bool;
    /// Reported after each successful write with the rows it affected.
    fn affected(&self, rows: u64);
}

/// Row budget shared by every statement (and client) holding a clone of the `Arc`.
///
/// The check and the update are separate, so concurrent writers can overshoot
/// `max` by at most one batch each.
#[derive(Debug)]
pub struct RowBudget {
    max: u64,
    written: AtomicU64,
}

impl RowBudget {
    #[must_use]
    pub fn new(max: u64) -> Self {
        Self {
            max,
            written: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RowLimit for RowBudget {
    async fn more(&self, _conn: &mut dyn ReadConnection) -> bool {
        self.written.load(Ordering::Relaxed) < self.max
    }

    fn affected(&self, rows: u64) {
        self.written.fetch_add(rows, Ordering::Relaxed);
    }
}

/// Stops writers once a table holds `max` rows, counted on the writer's own
/// connection before every write.
///
/// `count_sql` must return the row count in the first column of its first row.
/// A failed count lets the write through; the write reports the connection error.
#[derive(Debug)]
pub struct TableRows {
    count_sql: String,
    max: u64,
    written: AtomicU64,
}

impl TableRows {
    #[must_use]
    pub fn new(count_sql: impl Into<String>, max: u64) -> Self {
        Self {
            count_sql: count_sql.into(),
            max,
            written: AtomicU64::new(0),
        }
    }

    /// Rows reported by writes through this limit, for reporting only.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RowLimit for TableRows {
    async fn more(&self, conn: &mut dyn ReadConnection) -> bool {
        let rows = match conn.read(&self.count_sql).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!("row count failed ({}): {err}", self.count_sql);
                return true;
            }
        };
        let count = rows
            .rows()
            .first()
            .and_then(|row| row.first())
            .and_then(RowValues::as_int)
            .and_then(|n| u64::try_from(n).ok());
        match count {
            Some(count) => count < self.max,
            None => {
                tracing::warn!("row count returned no integer ({})", self.count_sql);
                true
            }
        }
    }

    fn affected(&self, rows: u64) {
        self.written.fetch_add(rows, Ordering::Relaxed);
    }
}

/// One statement of a workload. Immutable once built and shared by every client.
#[derive(Clone, Default)]
pub struct Statement {
    /// SQL text; `?`, `?N` and `$N` are placeholders for bound inputs.
    pub query: String,
    pub ddl: bool,
    pub write: bool,
    pub commit: bool,
    /// Starts a database transaction (gated by the TPS limiter).
    pub begin: bool,
    pub result_set: bool,
    pub prepare: bool,
    /// With `prepare`, the prepared handle also serves the next `prepare_multi - 1` statements.
    pub prepare_multi: usize,
    /// Non-zero makes the statement a pure delay; nothing is executed.
    pub idle: Duration,
    pub limit: Option<Arc<dyn RowLimit>>,
    pub trx_boundary: TrxBoundary,
}

impl Statement {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn idle(duration: Duration) -> Self {
        Self {
            idle: duration,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.idle.is_zero()
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("query", &self.query)
            .field("ddl", &self.ddl)
            .field("write", &self.write)
            .field("commit", &self.commit)
            .field("begin", &self.begin)
            .field("result_set", &self.result_set)
            .field("prepare", &self.prepare)
            .field("prepare_multi", &self.prepare_multi)
            .field("idle", &self.idle)
            .field("limit", &self.limit.is_some())
            .field("trx_boundary", &self.trx_boundary)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadgenError;
    use crate::results::ResultSet;

    /// Answers every read with one fixed count, or fails.
    struct Counted(Option<i64>);

    #[async_trait]
    impl ReadConnection for Counted {
        async fn read(&mut self, _sql: &str) -> Result<ResultSet, LoadgenError> {
            let n = self
                .0
                .ok_or_else(|| LoadgenError::ConnectionError("gone".into()))?;
            let mut rs = ResultSet::new(vec!["n".into()]);
            rs.add_row_values(vec![RowValues::Int(n)]);
            Ok(rs)
        }
    }

    #[tokio::test]
    async fn row_budget_allows_until_reached() {
        let budget = RowBudget::new(10);
        let mut conn = Counted(None);
        let mut writes = 0;
        while budget.more(&mut conn).await {
            budget.affected(3);
            writes += 1;
        }
        assert_eq!(writes, 4);
        assert_eq!(budget.written(), 12);
    }

    #[tokio::test]
    async fn table_rows_counts_on_the_connection() {
        let limit = TableRows::new("SELECT COUNT(*) FROM t", 5);
        assert!(limit.more(&mut Counted(Some(4))).await);
        assert!(!limit.more(&mut Counted(Some(5))).await);
        // A failed count does not stop the writer.
        assert!(limit.more(&mut Counted(None)).await);
    }

    #[test]
    fn idle_statement() {
        assert!(Statement::idle(Duration::from_millis(1)).is_idle());
        assert!(!Statement::new("SELECT 1").is_idle());
    }
}
