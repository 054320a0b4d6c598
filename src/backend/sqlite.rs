use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool, PooledConnection};
use rusqlite::types::{Value, ValueRef};
use tokio::sync::Mutex;

use super::{ClientConnection, ConnectionSource};
use crate::error::LoadgenError;
use crate::results::ResultSet;
use crate::types::{ExecResult, RowValues};

pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// bb8 manager opening `SQLite` connections on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: String,
    wal: bool,
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = LoadgenError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.path.clone();
        let wal = self.wal;
        async move {
            let conn = tokio::task::spawn_blocking(move || {
                let conn = rusqlite::Connection::open(&path)?;
                if wal {
                    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
                }
                Ok::<_, LoadgenError>(conn)
            })
            .await
            .map_err(|e| LoadgenError::ConnectionError(format!("sqlite open join error: {e}")))??;
            Ok(Arc::new(Mutex::new(conn)))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            run_blocking(handle, |guard| {
                guard
                    .execute_batch("SELECT 1")
                    .map_err(LoadgenError::SqliteError)
            })
            .await
        }
    }

    /// A connection still inside a transaction, or still busy on the blocking
    /// pool, is never handed out again.
    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        !conn.try_lock().is_ok_and(|guard| guard.is_autocommit())
    }
}

/// Fluent builder for [`SqliteSource`].
#[derive(Debug, Clone)]
pub struct SqliteSourceBuilder {
    path: String,
    pool_size: u32,
    wal: bool,
}

impl SqliteSourceBuilder {
    #[must_use]
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    /// Create the pool and check that one connection can be opened.
    ///
    /// # Errors
    /// Returns [`LoadgenError::ConnectionError`] if the pool cannot be built.
    pub async fn build(self) -> Result<SqliteSource, LoadgenError> {
        let manager = SqliteManager {
            path: self.path,
            wal: self.wal,
        };
        let pool = Pool::builder()
            .max_size(self.pool_size)
            .build(manager)
            .await
            .map_err(|e| {
                LoadgenError::ConnectionError(format!("Failed to create SQLite pool: {e}"))
            })?;
        Ok(SqliteSource { pool })
    }
}

/// Pool of `SQLite` connections to one database file.
#[derive(Clone)]
pub struct SqliteSource {
    pool: Pool<SqliteManager>,
}

impl SqliteSource {
    #[must_use]
    pub fn builder(path: impl Into<String>) -> SqliteSourceBuilder {
        SqliteSourceBuilder {
            path: path.into(),
            pool_size: 10,
            wal: true,
        }
    }

    /// Run setup SQL (schema, seed rows) on one pooled connection.
    ///
    /// # Errors
    /// Returns the checkout or `SQLite` error.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), LoadgenError> {
        let conn = self.acquire().await?;
        let sql = sql.to_owned();
        run_blocking(conn.handle(), move |guard| {
            guard.execute_batch(&sql).map_err(LoadgenError::SqliteError)
        })
        .await
    }
}

#[async_trait]
impl ConnectionSource for SqliteSource {
    type Conn = SqliteClientConnection;

    async fn acquire(&self) -> Result<Self::Conn, LoadgenError> {
        let conn = self.pool.get_owned().await.map_err(|e| {
            LoadgenError::ConnectionError(format!("sqlite checkout error: {e}"))
        })?;
        Ok(SqliteClientConnection { conn })
    }
}

/// Pooled `SQLite` connection checked out by one client.
pub struct SqliteClientConnection {
    conn: PooledConnection<'static, SqliteManager>,
}

impl SqliteClientConnection {
    fn handle(&self) -> SharedSqliteConnection {
        Arc::clone(&*self.conn)
    }
}

/// The statement text; the connection keeps the compiled statement in rusqlite's cache.
pub type SqlitePrepared = Arc<str>;

#[async_trait]
impl ClientConnection for SqliteClientConnection {
    type Prepared = SqlitePrepared;

    async fn prepare(&mut self, sql: &str) -> Result<Self::Prepared, LoadgenError> {
        let query: Arc<str> = Arc::from(sql);
        let cached = Arc::clone(&query);
        run_blocking(self.handle(), move |guard| {
            guard
                .prepare_cached(&cached)
                .map(|_| ())
                .map_err(LoadgenError::SqliteError)
        })
        .await?;
        Ok(query)
    }

    async fn close_prepared(&mut self, _ps: Self::Prepared) {
        // rusqlite evicts cached statements by LRU; nothing to release per handle.
    }

    async fn query(&mut self, sql: &str) -> Result<ResultSet, LoadgenError> {
        let sql = sql.to_owned();
        run_blocking(self.handle(), move |guard| {
            let mut stmt = guard.prepare(&sql)?;
            build_result_set(&mut stmt, &[])
        })
        .await
    }

    async fn query_prepared(
        &mut self,
        ps: &Self::Prepared,
        params: &[RowValues],
    ) -> Result<ResultSet, LoadgenError> {
        let sql = Arc::clone(ps);
        let params = convert_params(params);
        run_blocking(self.handle(), move |guard| {
            let mut stmt = guard.prepare_cached(&sql)?;
            build_result_set(&mut stmt, &params)
        })
        .await
    }

    async fn execute(&mut self, sql: &str) -> Result<ExecResult, LoadgenError> {
        let sql = sql.to_owned();
        run_blocking(self.handle(), move |guard| {
            let mut stmt = guard.prepare(&sql)?;
            let affected = stmt.execute([])?;
            Ok(exec_result(guard, affected))
        })
        .await
    }

    async fn execute_prepared(
        &mut self,
        ps: &Self::Prepared,
        params: &[RowValues],
    ) -> Result<ExecResult, LoadgenError> {
        let sql = Arc::clone(ps);
        let params = convert_params(params);
        run_blocking(self.handle(), move |guard| {
            let affected = {
                let mut stmt = guard.prepare_cached(&sql)?;
                stmt.execute(rusqlite::params_from_iter(params.iter()))?
            };
            Ok(exec_result(guard, affected))
        })
        .await
    }

    async fn use_database(&mut self, name: &str) -> Result<(), LoadgenError> {
        Err(LoadgenError::Unimplemented(format!(
            "SQLite has no default database to select ({name}); open the file instead"
        )))
    }

    /// Roll back any open transaction before the connection goes back to the pool.
    async fn close(self) {
        let rolled_back = run_blocking(self.handle(), |guard| {
            if !guard.is_autocommit() {
                guard.execute_batch("ROLLBACK")?;
            }
            Ok(())
        })
        .await;
        if let Err(err) = rolled_back {
            tracing::debug!("sqlite close: rollback failed: {err}");
        }
        drop(self.conn);
    }
}

fn exec_result(conn: &rusqlite::Connection, affected: usize) -> ExecResult {
    ExecResult {
        rows_affected: affected as u64,
        last_insert_id: Some(conn.last_insert_rowid()),
    }
}

pub(crate) async fn run_blocking<F, R>(
    conn: SharedSqliteConnection,
    func: F,
) -> Result<R, LoadgenError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, LoadgenError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| LoadgenError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

fn convert_params(params: &[RowValues]) -> Vec<Value> {
    params.iter().map(row_value_to_sqlite_value).collect()
}

fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(v) => Value::Text(v.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

fn sqlite_value_to_row_value(value: ValueRef<'_>) -> RowValues {
    match value {
        ValueRef::Null => RowValues::Null,
        ValueRef::Integer(i) => RowValues::Int(i),
        ValueRef::Real(f) => RowValues::Float(f),
        ValueRef::Text(bytes) => RowValues::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => RowValues::Blob(bytes.to_vec()),
    }
}

fn build_result_set(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[Value],
) -> Result<ResultSet, LoadgenError> {
    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let column_count = column_names.len();
    let mut result_set = ResultSet::new(column_names);

    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(sqlite_value_to_row_value(row.get_ref(i)?));
        }
        result_set.add_row_values(values);
    }
    Ok(result_set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_transactions_break_the_connection() -> Result<(), LoadgenError> {
        let manager = SqliteManager {
            path: ":memory:".into(),
            wal: false,
        };
        let mut conn: SharedSqliteConnection =
            Arc::new(Mutex::new(rusqlite::Connection::open_in_memory()?));
        assert!(!manager.has_broken(&mut conn));

        conn.blocking_lock().execute_batch("BEGIN")?;
        assert!(manager.has_broken(&mut conn));

        conn.blocking_lock().execute_batch("ROLLBACK")?;
        let held = Arc::clone(&conn);
        let _busy = held.blocking_lock();
        assert!(manager.has_broken(&mut conn));
        Ok(())
    }

    #[test]
    fn value_conversion() {
        assert_eq!(row_value_to_sqlite_value(&RowValues::Bool(true)), Value::Integer(1));
        assert_eq!(
            sqlite_value_to_row_value(ValueRef::Text(b"abc")),
            RowValues::Text("abc".into())
        );
        assert_eq!(sqlite_value_to_row_value(ValueRef::Null), RowValues::Null);
    }
}
