//! Convenient imports for building and running clients.

pub use crate::backend::{ClientConnection, ConnectionSource, ReadConnection};
pub use crate::classify::{ErrorFlags, ErrorPolicy};
pub use crate::client::{Client, ClientDone, ConnectOptions};
pub use crate::context::ExecContext;
pub use crate::data::{
    AutoInc, ClientIdValue, Column, Constant, RandomInt, RunCount, StatementData, ValueConsumer,
    ValueProducer,
};
pub use crate::error::{ClientError, LoadgenError};
pub use crate::limit::{IterBudget, RateLimiter};
pub use crate::results::ResultSet;
pub use crate::run_level::{RunLevel, Scope};
pub use crate::stats::{Category, StatsRecorder, StatsSnapshot, TrxStats};
pub use crate::trx::{RowBudget, RowLimit, Statement, TableRows, TrxBoundary};
pub use crate::types::{DatabaseType, ExecResult, RowValues};

#[cfg(feature = "postgres")]
pub use crate::backend::PostgresSource;
#[cfg(feature = "sqlite")]
pub use crate::backend::{SqliteSource, SqliteSourceBuilder};
