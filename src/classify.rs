//! Error-code policy tables.
//!
//! A policy maps a dialect error code to [`ErrorFlags`]. Codes missing from the
//! table carry no flags: the error is logged and the client reconnects.

use std::collections::HashMap;
use std::ops::BitOr;

/// Recovery policy for one error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ErrorFlags(u8);

impl ErrorFlags {
    pub const NONE: ErrorFlags = ErrorFlags(0);
    /// Stop the client.
    pub const ABORT: ErrorFlags = ErrorFlags(1);
    /// Roll back if a trx is active.
    pub const ROLLBACK: ErrorFlags = ErrorFlags(1 << 1);
    /// Keep the connection and go on with the next iteration.
    pub const CONTINUE: ErrorFlags = ErrorFlags(1 << 2);
    /// Do not log the error or the reconnect.
    pub const SILENT: ErrorFlags = ErrorFlags(1 << 3);

    #[must_use]
    pub const fn contains(self, other: ErrorFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for ErrorFlags {
    type Output = ErrorFlags;

    fn bitor(self, rhs: ErrorFlags) -> ErrorFlags {
        ErrorFlags(self.0 | rhs.0)
    }
}

/// Error-code table for one database dialect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorPolicy {
    table: HashMap<String, ErrorFlags>,
}

impl ErrorPolicy {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, code: impl Into<String>, flags: ErrorFlags) -> Self {
        self.table.insert(code.into(), flags);
        self
    }

    /// Flags for `code`, or `None` if the code is not handled by this policy.
    #[must_use]
    pub fn lookup(&self, code: Option<&str>) -> Option<ErrorFlags> {
        code.and_then(|c| self.table.get(c).copied())
    }

    /// `SQLite` extended result codes.
    #[must_use]
    pub fn sqlite() -> Self {
        use ErrorFlags as E;
        Self::empty()
            .with("1", E::ABORT) // SQLITE_ERROR: syntax, no such table
            .with("5", E::ROLLBACK | E::CONTINUE) // SQLITE_BUSY
            .with("6", E::ROLLBACK | E::CONTINUE) // SQLITE_LOCKED
            .with("261", E::ROLLBACK | E::CONTINUE) // SQLITE_BUSY_RECOVERY
            .with("517", E::ROLLBACK | E::CONTINUE) // SQLITE_BUSY_SNAPSHOT
            .with("8", E::ABORT | E::SILENT) // SQLITE_READONLY
            .with("9", E::SILENT) // SQLITE_INTERRUPT
            .with("1555", E::CONTINUE) // SQLITE_CONSTRAINT_PRIMARYKEY
            .with("2067", E::CONTINUE) // SQLITE_CONSTRAINT_UNIQUE
    }

    /// PostgreSQL SQLSTATE codes.
    #[must_use]
    pub fn postgres() -> Self {
        use ErrorFlags as E;
        Self::empty()
            .with("42601", E::ABORT) // syntax_error
            .with("42P01", E::ABORT) // undefined_table
            .with("42703", E::ABORT) // undefined_column
            .with("3F000", E::ABORT) // invalid_schema_name
            .with("3D000", E::ABORT) // invalid_catalog_name
            .with("40001", E::ROLLBACK | E::CONTINUE) // serialization_failure
            .with("40P01", E::ROLLBACK | E::CONTINUE) // deadlock_detected
            .with("55P03", E::ROLLBACK | E::CONTINUE) // lock_not_available
            .with("25006", E::ABORT | E::SILENT) // read_only_sql_transaction
            .with("57014", E::SILENT) // query_canceled
            .with("23505", E::CONTINUE) // unique_violation
    }
}
