use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::time::Instant;

use super::connect::{Cause, Connected};
use super::{Client, ClientDone};
use crate::backend::{ClientConnection, ConnectionSource};
use crate::context::ExecContext;
use crate::data::RunCount;
use crate::error::{ClientError, LoadgenError};
use crate::literal::substitute_params;
use crate::stats::{Category, StatsRecorder};
use crate::trx::{Statement, TrxBoundary};
use crate::types::RowValues;

/// Result of one successful statement execution.
enum Step {
    Next,
    /// The statement's row limit is exhausted; the client is done.
    Stop,
}

impl<S: ConnectionSource> Client<S> {
    /// Run the client until its iteration budget is spent, its row limit is
    /// reached, `ctx` ends, or a fatal error occurs.
    ///
    /// Exactly one [`ClientDone`] is sent on the completion channel, after the
    /// connection and every prepared handle are closed. Cancellation is reported
    /// as a clean finish. A panic inside the loop is caught and reported as
    /// [`LoadgenError::Panic`].
    pub async fn run(mut self, ctx: ExecContext) {
        tracing::debug!("client {} running", self.run_level.client_id());

        let outcome = AssertUnwindSafe(self.run_loop(&ctx)).catch_unwind().await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(ClientError::new(LoadgenError::Panic {
                message: panic_message(panic.as_ref()),
                backtrace: Backtrace::force_capture().to_string(),
            })),
        };

        self.disconnect().await;

        let client_id = self.run_level.client_id();
        let error = match result {
            Ok(()) => None,
            Err(err) if err.err.is_cancellation() => None,
            Err(err) => Some(err),
        };
        match &error {
            Some(err) => tracing::debug!("client {client_id} stopped: {err}"),
            None => tracing::debug!("client {client_id} done"),
        }

        let done = ClientDone {
            run_level: self.run_level,
            error,
            run_count: self.rc,
        };
        if self.done.send(done).is_err() {
            tracing::debug!("client {client_id} completion receiver dropped");
        }
    }

    async fn run_loop(&mut self, ctx: &ExecContext) -> Result<(), ClientError> {
        self.rc = RunCount::for_client(&self.run_level);
        self.connect(ctx, None).await?;
        self.rc.conn = 1;

        let statements = Arc::clone(&self.statements);

        'iter: loop {
            if let Some(budget) = &self.iter_exec_group {
                if budget.increment_and_check() {
                    return Ok(());
                }
            }
            if let Some(budget) = &self.iter_client_group {
                if budget.increment_and_check() {
                    return Ok(());
                }
            }
            if self.iter > 0 && self.rc.iter == self.iter {
                return Ok(());
            }

            self.rc.iter += 1;
            let mut trx_no: Option<usize> = None;
            let mut trx_active = false;

            for (i, stmt) in statements.iter().enumerate() {
                if stmt.is_idle() {
                    ctx.sleep(stmt.idle).await?;
                    continue;
                }

                match stmt.trx_boundary {
                    TrxBoundary::Begin => {
                        self.rc.trx += 1;
                        trx_no = Some(trx_no.map_or(0, |n| n + 1));
                        trx_active = true;
                    }
                    TrxBoundary::End => trx_active = false,
                    TrxBoundary::None => {}
                }

                if stmt.begin {
                    if let Some(tps) = &self.tps {
                        tps.wait(ctx).await?;
                    }
                }
                if let Some(qps) = &self.qps {
                    qps.wait(ctx).await?;
                }

                self.rc.statement += 1;
                self.data[i].bind(&self.rc, &mut self.values[i]);

                let step = if stmt.result_set {
                    self.query(ctx, i, stmt, trx_no).await
                } else {
                    self.exec(ctx, i, stmt, trx_no).await
                };

                match step {
                    Ok(Step::Next) => {}
                    Ok(Step::Stop) => return Ok(()),
                    Err(err) => {
                        if ctx.err().is_none() {
                            if let Some(stats) = trx_stats(&self.stats, trx_no) {
                                stats.record_error(err.code().as_deref());
                            }
                        }
                        let cause = Cause {
                            err,
                            statement_no: i,
                            trx_active,
                        };
                        match self.connect(ctx, Some(cause)).await {
                            Ok(Connected::Reconnected) => self.rc.conn += 1,
                            Ok(Connected::Kept) => {}
                            Err(mut err) => {
                                err.statement_no.get_or_insert(i);
                                return Err(err);
                            }
                        }
                        continue 'iter;
                    }
                }
            }
        }
    }

    /// Execute a result-set statement and scan its rows into the output consumers.
    async fn query(
        &mut self,
        ctx: &ExecContext,
        i: usize,
        stmt: &Statement,
        trx_no: Option<usize>,
    ) -> Result<Step, LoadgenError> {
        let conn = connected(&mut self.conn)?;
        let params = &self.values[i];
        let started = Instant::now();
        let res = match self.prepared.get(i) {
            Some(ps) => ctx.run(conn.query_prepared(ps, params)).await,
            None => {
                let sql = substitute_params(&stmt.query, params)?;
                ctx.run(conn.query(&sql)).await
            }
        };
        record(&self.stats, trx_no, Category::Read, started);
        let rows = res?;

        if let Some(outputs) = &self.data[i].outputs {
            for row in rows.rows() {
                if row.len() < outputs.len() {
                    return Err(LoadgenError::ExecutionError(format!(
                        "query returned {} columns, {} outputs bound: {}",
                        row.len(),
                        outputs.len(),
                        stmt.query
                    )));
                }
                for (consumer, value) in outputs.iter().zip(row) {
                    consumer.scan(value.clone());
                }
            }
        }
        Ok(Step::Next)
    }

    /// Execute a statement that returns no rows.
    async fn exec(
        &mut self,
        ctx: &ExecContext,
        i: usize,
        stmt: &Statement,
        trx_no: Option<usize>,
    ) -> Result<Step, LoadgenError> {
        let conn = connected(&mut self.conn)?;
        if let Some(limit) = &stmt.limit {
            if !ctx.run(async { Ok(limit.more(&mut *conn).await) }).await? {
                return Ok(Step::Stop);
            }
        }

        let params = &self.values[i];
        let started = Instant::now();
        let res = match self.prepared.get(i) {
            Some(ps) => ctx.run(conn.execute_prepared(ps, params)).await,
            None => {
                let sql = substitute_params(&stmt.query, params)?;
                ctx.run(conn.execute(&sql)).await
            }
        };
        let category = if stmt.write {
            Category::Write
        } else if stmt.commit {
            Category::Commit
        } else {
            Category::Total
        };
        record(&self.stats, trx_no, category, started);
        let res = res?;

        if let Some(limit) = &stmt.limit {
            limit.affected(res.rows_affected);
        }
        if let (Some(consumer), Some(id)) = (&self.data[i].insert_id, res.last_insert_id) {
            consumer.scan(RowValues::Int(id));
        }
        Ok(Step::Next)
    }
}

fn connected<C>(conn: &mut Option<C>) -> Result<&mut C, LoadgenError> {
    conn.as_mut()
        .ok_or_else(|| LoadgenError::ConnectionError("client is not connected".into()))
}

fn trx_stats(
    stats: &[Option<Arc<dyn StatsRecorder>>],
    trx_no: Option<usize>,
) -> Option<&Arc<dyn StatsRecorder>> {
    trx_no.and_then(|n| stats.get(n)).and_then(Option::as_ref)
}

fn record(
    stats: &[Option<Arc<dyn StatsRecorder>>],
    trx_no: Option<usize>,
    category: Category,
    started: Instant,
) {
    if let Some(stats) = trx_stats(stats, trx_no) {
        let micros = i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX);
        stats.record(category, micros);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
