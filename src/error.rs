use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadgenError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PoolErrorPostgres(#[from] deadpool_postgres::PoolError),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    /// Driver-neutral database error carrying the dialect error code.
    #[error("database error {code}: {message}")]
    Database { code: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    /// Schema-change statement failed with an error the policy does not handle.
    #[error("DDL: {0}")]
    Ddl(Box<LoadgenError>),

    #[error("ROLLBACK failed: {source} (on err: {cause}) (query: {query})")]
    Rollback {
        source: Box<LoadgenError>,
        cause: String,
        query: String,
    },

    #[error("prepare: {0}")]
    Prepare(Box<LoadgenError>),

    /// Unexpected runtime fault captured at the top of a client task.
    #[error("PANIC: {message}\n{backtrace}")]
    Panic { message: String, backtrace: String },

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl LoadgenError {
    /// Dialect error code used for policy lookup and error stats.
    ///
    /// `SQLite` errors report the extended result code, Postgres errors the SQLSTATE.
    #[must_use]
    pub fn code(&self) -> Option<String> {
        match self {
            #[cfg(feature = "sqlite")]
            LoadgenError::SqliteError(rusqlite::Error::SqliteFailure(err, _)) => {
                Some(err.extended_code.to_string())
            }
            #[cfg(feature = "postgres")]
            LoadgenError::PostgresError(err) => err.code().map(|state| state.code().to_string()),
            #[cfg(feature = "postgres")]
            LoadgenError::PoolErrorPostgres(deadpool_postgres::PoolError::Backend(err)) => {
                err.code().map(|state| state.code().to_string())
            }
            LoadgenError::Database { code, .. } => Some(code.clone()),
            LoadgenError::Ddl(inner) | LoadgenError::Prepare(inner) => inner.code(),
            _ => None,
        }
    }

    /// True for cooperative cancellation and deadline expiry, which are not failures.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LoadgenError::Cancelled | LoadgenError::DeadlineExceeded)
    }
}

/// Terminal error of one client.
///
/// `statement_no` is the index of the statement that caused the client to stop, if any.
#[derive(Debug, Error)]
#[error("{err} (statement {})", statement_label(.statement_no))]
pub struct ClientError {
    #[source]
    pub err: LoadgenError,
    pub statement_no: Option<usize>,
}

impl ClientError {
    #[must_use]
    pub fn new(err: LoadgenError) -> Self {
        Self {
            err,
            statement_no: None,
        }
    }

    #[must_use]
    pub fn at(err: LoadgenError, statement_no: usize) -> Self {
        Self {
            err,
            statement_no: Some(statement_no),
        }
    }
}

impl From<LoadgenError> for ClientError {
    fn from(err: LoadgenError) -> Self {
        ClientError::new(err)
    }
}

fn statement_label(statement_no: &Option<usize>) -> String {
    match statement_no {
        Some(n) => n.to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_error_reports_its_code() {
        let err = LoadgenError::Database {
            code: "40001".into(),
            message: "serialization failure".into(),
        };
        assert_eq!(err.code().as_deref(), Some("40001"));
        assert_eq!(LoadgenError::Ddl(Box::new(err)).code().as_deref(), Some("40001"));
    }

    #[test]
    fn cancellation_class() {
        assert!(LoadgenError::Cancelled.is_cancellation());
        assert!(LoadgenError::DeadlineExceeded.is_cancellation());
        assert!(!LoadgenError::ExecutionError("x".into()).is_cancellation());
    }

    #[test]
    fn client_error_display_includes_statement() {
        let err = ClientError::at(LoadgenError::ExecutionError("boom".into()), 3);
        assert_eq!(err.to_string(), "SQL execution error: boom (statement 3)");
        let err = ClientError::new(LoadgenError::Cancelled);
        assert_eq!(err.to_string(), "context canceled (statement -)");
    }
}
