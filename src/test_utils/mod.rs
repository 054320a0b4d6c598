//! Scripted in-memory backend for driving clients without a database.
//!
//! [`ScriptedSource`] hands out [`ScriptedConnection`]s that answer from a script
//! of [`Reply`]s keyed by SQL prefix and log every call they receive, so tests
//! can assert on the exact sequence of connects, prepares, executions, rollbacks
//! and closes a client performs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{ClientConnection, ConnectionSource};
use crate::error::LoadgenError;
use crate::results::ResultSet;
use crate::types::{ExecResult, RowValues};

/// Scripted answer to one call.
#[derive(Debug, Clone)]
pub enum Reply {
    Rows(ResultSet),
    Exec(ExecResult),
    /// Fails with a database error carrying `code`.
    Error { code: String, message: String },
    /// Never completes; only cancellation gets the caller out.
    Hang,
    Panic(String),
}

impl Reply {
    #[must_use]
    pub fn rows(columns: &[&str], rows: Vec<Vec<RowValues>>) -> Self {
        let mut rs = ResultSet::with_capacity(
            columns.iter().map(|c| (*c).to_string()).collect(),
            rows.len(),
        );
        for row in rows {
            rs.add_row_values(row);
        }
        Reply::Rows(rs)
    }

    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Reply::Exec(ExecResult {
            rows_affected,
            last_insert_id: None,
        })
    }

    #[must_use]
    pub fn inserted(id: i64) -> Self {
        Reply::Exec(ExecResult {
            rows_affected: 1,
            last_insert_id: Some(id),
        })
    }

    #[must_use]
    pub fn error(code: &str, message: &str) -> Self {
        Reply::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Kind of call a reply answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Prepare,
    Query,
    Execute,
}

/// One call received by a scripted connection. `conn` numbers connections from 1.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Acquire { conn: usize },
    Prepare { conn: usize, sql: String },
    ClosePrepared { conn: usize, sql: String },
    Query {
        conn: usize,
        sql: String,
        prepared: bool,
        params: Vec<RowValues>,
    },
    Execute {
        conn: usize,
        sql: String,
        prepared: bool,
        params: Vec<RowValues>,
    },
    UseDatabase { conn: usize, name: String },
    Close { conn: usize },
}

impl Call {
    /// SQL of a prepare, query or execute call.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Call::Prepare { sql, .. }
            | Call::ClosePrepared { sql, .. }
            | Call::Query { sql, .. }
            | Call::Execute { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Script {
    once: Vec<(Op, String, VecDeque<Reply>)>,
    always: Vec<(Op, String, Reply)>,
    failed_acquires: usize,
    acquire_delay: Option<Duration>,
    calls: Vec<Call>,
}

impl Script {
    fn next_reply(&mut self, op: Op, sql: &str) -> Option<Reply> {
        for (entry_op, key, replies) in &mut self.once {
            if *entry_op == op && sql.starts_with(key.as_str()) {
                if let Some(reply) = replies.pop_front() {
                    return Some(reply);
                }
            }
        }
        self.always
            .iter()
            .find(|(entry_op, key, _)| *entry_op == op && sql.starts_with(key.as_str()))
            .map(|(_, _, reply)| reply.clone())
    }
}

struct Shared {
    script: Mutex<Script>,
    next_conn: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connection source answering from a script.
#[derive(Clone)]
pub struct ScriptedSource {
    shared: Arc<Shared>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                script: Mutex::new(Script::default()),
                next_conn: AtomicUsize::new(1),
            }),
        }
    }

    /// Answer the next `op` whose SQL starts with `prefix` with `reply`.
    ///
    /// Replies queued for the same prefix are used in order, before any `always` reply.
    pub fn once(&self, op: Op, prefix: &str, reply: Reply) -> &Self {
        let mut script = self.shared.lock();
        if let Some((_, _, replies)) = script
            .once
            .iter_mut()
            .find(|(o, k, _)| *o == op && k == prefix)
        {
            replies.push_back(reply);
        } else {
            script
                .once
                .push((op, prefix.to_string(), VecDeque::from([reply])));
        }
        self
    }

    /// Answer every `op` whose SQL starts with `prefix` with `reply`.
    pub fn always(&self, op: Op, prefix: &str, reply: Reply) -> &Self {
        self.shared
            .lock()
            .always
            .push((op, prefix.to_string(), reply));
        self
    }

    /// Fail the next `n` acquire attempts.
    pub fn fail_acquires(&self, n: usize) -> &Self {
        self.shared.lock().failed_acquires = n;
        self
    }

    /// Delay every acquire by `delay`.
    pub fn delay_acquires(&self, delay: Duration) -> &Self {
        self.shared.lock().acquire_delay = Some(delay);
        self
    }

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.shared.lock().calls.clone()
    }

    #[must_use]
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.shared.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Number of connections handed out.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.count(|c| matches!(c, Call::Acquire { .. }))
    }

    /// Query and execute calls whose SQL starts with `prefix`.
    #[must_use]
    pub fn executions(&self, prefix: &str) -> usize {
        self.count(|c| {
            matches!(c, Call::Query { .. } | Call::Execute { .. })
                && c.sql().is_some_and(|sql| sql.starts_with(prefix))
        })
    }
}

#[async_trait]
impl ConnectionSource for ScriptedSource {
    type Conn = ScriptedConnection;

    async fn acquire(&self) -> Result<Self::Conn, LoadgenError> {
        let delay = self.shared.lock().acquire_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.shared.lock();
        if script.failed_acquires > 0 {
            script.failed_acquires -= 1;
            return Err(LoadgenError::ConnectionError("scripted connect failure".into()));
        }
        let id = self.shared.next_conn.fetch_add(1, Ordering::Relaxed);
        script.calls.push(Call::Acquire { conn: id });
        Ok(ScriptedConnection {
            id,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Connection handed out by [`ScriptedSource`].
pub struct ScriptedConnection {
    id: usize,
    shared: Arc<Shared>,
}

/// Prepared handle of a [`ScriptedConnection`].
#[derive(Debug, Clone)]
pub struct ScriptedPrepared {
    pub conn: usize,
    pub sql: String,
}

impl ScriptedConnection {
    fn log_and_reply(&self, call: Call, op: Op) -> Option<Reply> {
        let mut script = self.shared.lock();
        let reply = call.sql().and_then(|sql| script.next_reply(op, sql));
        script.calls.push(call);
        reply
    }

    fn check_prepared(&self, ps: &ScriptedPrepared) -> Result<(), LoadgenError> {
        if ps.conn == self.id {
            Ok(())
        } else {
            Err(LoadgenError::ExecutionError(format!(
                "statement prepared on connection {} used on connection {}",
                ps.conn, self.id
            )))
        }
    }

    async fn rows(&self, call: Call) -> Result<ResultSet, LoadgenError> {
        match self.log_and_reply(call, Op::Query) {
            None => Ok(ResultSet::default()),
            Some(Reply::Rows(rs)) => Ok(rs),
            Some(Reply::Exec(_)) => Ok(ResultSet::default()),
            Some(other) => fail(other).await,
        }
    }

    async fn exec(&self, call: Call) -> Result<ExecResult, LoadgenError> {
        match self.log_and_reply(call, Op::Execute) {
            None | Some(Reply::Rows(_)) => Ok(ExecResult {
                rows_affected: 1,
                last_insert_id: None,
            }),
            Some(Reply::Exec(res)) => Ok(res),
            Some(other) => fail(other).await,
        }
    }
}

async fn fail<T>(reply: Reply) -> Result<T, LoadgenError> {
    match reply {
        Reply::Error { code, message } => Err(LoadgenError::Database { code, message }),
        Reply::Panic(message) => panic!("{message}"),
        Reply::Hang | Reply::Rows(_) | Reply::Exec(_) => std::future::pending().await,
    }
}

#[async_trait]
impl ClientConnection for ScriptedConnection {
    type Prepared = ScriptedPrepared;

    async fn prepare(&mut self, sql: &str) -> Result<Self::Prepared, LoadgenError> {
        let call = Call::Prepare {
            conn: self.id,
            sql: sql.to_string(),
        };
        match self.log_and_reply(call, Op::Prepare) {
            None | Some(Reply::Rows(_) | Reply::Exec(_)) => Ok(ScriptedPrepared {
                conn: self.id,
                sql: sql.to_string(),
            }),
            Some(other) => fail(other).await,
        }
    }

    async fn close_prepared(&mut self, ps: Self::Prepared) {
        self.shared.lock().calls.push(Call::ClosePrepared {
            conn: self.id,
            sql: ps.sql,
        });
    }

    async fn query(&mut self, sql: &str) -> Result<ResultSet, LoadgenError> {
        self.rows(Call::Query {
            conn: self.id,
            sql: sql.to_string(),
            prepared: false,
            params: Vec::new(),
        })
        .await
    }

    async fn query_prepared(
        &mut self,
        ps: &Self::Prepared,
        params: &[RowValues],
    ) -> Result<ResultSet, LoadgenError> {
        self.check_prepared(ps)?;
        self.rows(Call::Query {
            conn: self.id,
            sql: ps.sql.clone(),
            prepared: true,
            params: params.to_vec(),
        })
        .await
    }

    async fn execute(&mut self, sql: &str) -> Result<ExecResult, LoadgenError> {
        self.exec(Call::Execute {
            conn: self.id,
            sql: sql.to_string(),
            prepared: false,
            params: Vec::new(),
        })
        .await
    }

    async fn execute_prepared(
        &mut self,
        ps: &Self::Prepared,
        params: &[RowValues],
    ) -> Result<ExecResult, LoadgenError> {
        self.check_prepared(ps)?;
        self.exec(Call::Execute {
            conn: self.id,
            sql: ps.sql.clone(),
            prepared: true,
            params: params.to_vec(),
        })
        .await
    }

    async fn use_database(&mut self, name: &str) -> Result<(), LoadgenError> {
        self.shared.lock().calls.push(Call::UseDatabase {
            conn: self.id,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn close(self) {
        self.shared.lock().calls.push(Call::Close { conn: self.id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_follow_the_script() {
        let source = ScriptedSource::new();
        source
            .once(Op::Execute, "UPDATE", Reply::error("1213", "deadlock"))
            .always(Op::Execute, "UPDATE", Reply::affected(3));

        let mut conn = source.acquire().await.unwrap();
        let err = conn.execute("UPDATE t SET c = 1").await.unwrap_err();
        assert_eq!(err.code().as_deref(), Some("1213"));
        let res = conn.execute("UPDATE t SET c = 2").await.unwrap();
        assert_eq!(res.rows_affected, 3);
        assert_eq!(source.executions("UPDATE"), 2);
    }

    #[tokio::test]
    async fn prepared_handles_are_bound_to_their_connection() {
        let source = ScriptedSource::new();
        let mut first = source.acquire().await.unwrap();
        let mut second = source.acquire().await.unwrap();
        let ps = first.prepare("SELECT 1").await.unwrap();
        assert!(first.query_prepared(&ps, &[]).await.is_ok());
        assert!(second.query_prepared(&ps, &[]).await.is_err());
    }

    #[tokio::test]
    async fn failed_acquires_are_not_logged() {
        let source = ScriptedSource::new();
        source.fail_acquires(2);
        assert!(source.acquire().await.is_err());
        assert!(source.acquire().await.is_err());
        assert!(source.acquire().await.is_ok());
        assert_eq!(source.connections(), 1);
    }
}
