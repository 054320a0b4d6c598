//! Connection seams between the client engine and a database driver.
//!
//! A [`ConnectionSource`] hands out exclusive connections (usually checked out of
//! a pool); a [`ClientConnection`] executes statements on one of them. The engine
//! knows nothing else about the driver.

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;

use crate::error::LoadgenError;
use crate::results::ResultSet;
use crate::types::{ExecResult, RowValues};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConnection, PostgresSource};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteClientConnection, SqliteSource, SqliteSourceBuilder};

/// Acquire-one semantics over a pool of connections.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    type Conn: ClientConnection;

    /// Check out one connection for exclusive use by a client.
    async fn acquire(&self) -> Result<Self::Conn, LoadgenError>;
}

/// One exclusively owned connection.
///
/// Prepared handles are only valid on the connection that prepared them.
#[async_trait]
pub trait ClientConnection: Send + 'static {
    type Prepared: Send + Sync + 'static;

    async fn prepare(&mut self, sql: &str) -> Result<Self::Prepared, LoadgenError>;

    /// Release a prepared handle. Best effort: failures are not reported.
    async fn close_prepared(&mut self, ps: Self::Prepared);

    async fn query(&mut self, sql: &str) -> Result<ResultSet, LoadgenError>;

    async fn query_prepared(
        &mut self,
        ps: &Self::Prepared,
        params: &[RowValues],
    ) -> Result<ResultSet, LoadgenError>;

    async fn execute(&mut self, sql: &str) -> Result<ExecResult, LoadgenError>;

    async fn execute_prepared(
        &mut self,
        ps: &Self::Prepared,
        params: &[RowValues],
    ) -> Result<ExecResult, LoadgenError>;

    /// Make `name` the default database/schema for the rest of the session.
    async fn use_database(&mut self, name: &str) -> Result<(), LoadgenError>;

    /// Release the connection back to (or out of) its pool.
    async fn close(self)
    where
        Self: Sized;
}

/// Read-only, object-safe view of a live connection.
///
/// Handed to collaborators that only look at the database, such as a
/// [`RowLimit`](crate::trx::RowLimit) sizing a table before each write.
#[async_trait]
pub trait ReadConnection: Send {
    async fn read(&mut self, sql: &str) -> Result<ResultSet, LoadgenError>;
}

#[async_trait]
impl<C: ClientConnection> ReadConnection for C {
    async fn read(&mut self, sql: &str) -> Result<ResultSet, LoadgenError> {
        self.query(sql).await
    }
}
