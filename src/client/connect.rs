use tokio::time::Instant;

use super::{Client, ConnectOptions};
use crate::backend::{ClientConnection, ConnectionSource};
use crate::classify::ErrorFlags;
use crate::context::ExecContext;
use crate::error::{ClientError, LoadgenError};
use crate::run_level::RunLevel;

/// How a statement error was resolved by [`Client::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Connected {
    /// The client holds a new connection with every prepared group ready.
    Reconnected,
    /// The error is ignored and the current connection is kept.
    Kept,
}

/// A statement failure handed to the connection manager.
pub(super) struct Cause {
    pub err: LoadgenError,
    pub statement_no: usize,
    pub trx_active: bool,
}

impl<S: ConnectionSource> Client<S> {
    /// Establish the client's connection, or handle `cause` and re-establish it.
    ///
    /// Without a cause this is the initial connect. With one, the error policy
    /// decides whether the error is fatal, needs a rollback, is ignored in place
    /// or leads to a reconnect.
    pub(super) async fn connect(
        &mut self,
        ctx: &ExecContext,
        cause: Option<Cause>,
    ) -> Result<Connected, ClientError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let mut silent = false;
        if let Some(cause) = cause {
            match self.handle_cause(ctx, cause).await? {
                Some(flags) if flags.contains(ErrorFlags::CONTINUE) => return Ok(Connected::Kept),
                Some(flags) => silent = flags.contains(ErrorFlags::SILENT),
                None => {}
            }
        }

        let reconnecting = self.conn.is_some();
        if reconnecting {
            self.disconnect().await;
            ctx.sleep(self.options.retry_wait).await?;
        }

        let started = Instant::now();
        let conn = acquire(self.source.as_ref(), &self.options, &self.run_level, ctx).await?;
        self.conn = Some(conn);
        if reconnecting && !silent {
            tracing::warn!(
                "client {} reconnected in {:.3}s",
                self.run_level.client_id(),
                started.elapsed().as_secs_f64()
            );
        }

        self.prepare_session(ctx).await
    }

    /// Apply the error policy to `cause`. Returns the matched flags, if any.
    async fn handle_cause(
        &mut self,
        ctx: &ExecContext,
        cause: Cause,
    ) -> Result<Option<ErrorFlags>, ClientError> {
        let Cause {
            err,
            statement_no,
            trx_active,
        } = cause;
        let stmt = &self.statements[statement_no];
        let flags = self.policy.lookup(err.code().as_deref());

        let Some(flags) = flags else {
            if stmt.ddl {
                return Err(ClientError::at(LoadgenError::Ddl(Box::new(err)), statement_no));
            }
            tracing::warn!(
                "client {} reconnect on error: {} ({})",
                self.run_level.client_id(),
                err,
                stmt.query
            );
            return Ok(None);
        };

        if flags.contains(ErrorFlags::ABORT) {
            return Err(ClientError::at(err, statement_no));
        }

        if flags.contains(ErrorFlags::ROLLBACK) && trx_active {
            if let Some(conn) = self.conn.as_mut() {
                tracing::debug!("client {}: rollback", self.run_level.client_id());
                if let Err(rb_err) = ctx.run(conn.execute("ROLLBACK")).await {
                    if rb_err.is_cancellation() {
                        return Err(rb_err.into());
                    }
                    return Err(ClientError::at(
                        LoadgenError::Rollback {
                            source: Box::new(rb_err),
                            cause: err.to_string(),
                            query: stmt.query.clone(),
                        },
                        statement_no,
                    ));
                }
            }
        }

        if !flags.contains(ErrorFlags::CONTINUE) && !flags.contains(ErrorFlags::SILENT) {
            tracing::warn!(
                "client {} reconnect on error: {} ({})",
                self.run_level.client_id(),
                err,
                stmt.query
            );
        }
        Ok(Some(flags))
    }

    /// Select the default database and prepare every prepared group on the new connection.
    async fn prepare_session(&mut self, ctx: &ExecContext) -> Result<Connected, ClientError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(LoadgenError::ConnectionError("no connection".into()).into());
        };

        if let Some(db) = &self.options.default_db {
            ctx.run(conn.use_database(db)).await?;
        }

        for (group, &leader) in self.prepared.leaders.iter().enumerate() {
            if self.prepared.handles[group].is_some() {
                continue;
            }
            let query = &self.statements[leader].query;
            match ctx.run(conn.prepare(query)).await {
                Ok(ps) => self.prepared.handles[group] = Some(ps),
                Err(err) if err.is_cancellation() => return Err(err.into()),
                Err(err) => {
                    return Err(ClientError::at(LoadgenError::Prepare(Box::new(err)), leader));
                }
            }
        }
        Ok(Connected::Reconnected)
    }

    /// Close every prepared handle, then the connection itself.
    pub(super) async fn disconnect(&mut self) {
        let handles = self.prepared.take_all();
        if let Some(mut conn) = self.conn.take() {
            for ps in handles {
                conn.close_prepared(ps).await;
            }
            conn.close().await;
        }
    }
}

/// Retry until `source` hands out a connection or the context ends.
async fn acquire<S: ConnectionSource>(
    source: &S,
    options: &ConnectOptions,
    run_level: &RunLevel,
    ctx: &ExecContext,
) -> Result<S::Conn, ClientError> {
    loop {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        let attempt =
            tokio::time::timeout(options.connect_timeout, ctx.run(source.acquire())).await;
        match attempt {
            Ok(Ok(conn)) => return Ok(conn),
            Ok(Err(err)) if err.is_cancellation() => return Err(err.into()),
            Ok(Err(err)) => {
                tracing::debug!("client {} connect: {err}", run_level.client_id());
            }
            Err(_) => {
                tracing::debug!(
                    "client {} connect: timed out after {:?}",
                    run_level.client_id(),
                    options.connect_timeout
                );
            }
        }
        ctx.sleep(options.retry_wait).await?;
    }
}
