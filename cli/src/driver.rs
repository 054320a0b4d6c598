use std::sync::Arc;

use sql_loadgen::prelude::*;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::args::RunConfig;
use crate::report::{ClientReport, Report, merge_trx_stats};
use crate::workload::Workload;

/// Open the configured backend and run the workload on it.
pub(crate) async fn run(config: &RunConfig, ctx: ExecContext) -> Result<Report, LoadgenError> {
    let workload = Workload::load(&config.workload)?;
    match config.backend {
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => run_sqlite(config, &workload, ctx).await,
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => run_postgres(config, &workload, ctx).await,
    }
}

#[cfg(feature = "sqlite")]
async fn run_sqlite(
    config: &RunConfig,
    workload: &Workload,
    ctx: ExecContext,
) -> Result<Report, LoadgenError> {
    let source = SqliteSource::builder(config.dsn.clone())
        .pool_size(config.pool_size)
        .build()
        .await?;
    run_clients(Arc::new(source), ErrorPolicy::sqlite(), config, workload, ctx).await
}

#[cfg(feature = "postgres")]
async fn run_postgres(
    config: &RunConfig,
    workload: &Workload,
    ctx: ExecContext,
) -> Result<Report, LoadgenError> {
    let pool_size = usize::try_from(config.pool_size).unwrap_or(usize::MAX);
    let source = PostgresSource::from_url(&config.dsn, pool_size)?;
    run_clients(Arc::new(source), ErrorPolicy::postgres(), config, workload, ctx).await
}

async fn setup<S: ConnectionSource>(source: &S, sql: &[String]) -> Result<(), LoadgenError> {
    if sql.is_empty() {
        return Ok(());
    }
    let mut conn = source.acquire().await?;
    for stmt in sql {
        tracing::info!("setup: {stmt}");
        if let Err(err) = conn.execute(stmt).await {
            conn.close().await;
            return Err(err);
        }
    }
    conn.close().await;
    Ok(())
}

/// Start one task per client and wait for every completion.
pub(crate) async fn run_clients<S: ConnectionSource>(
    source: Arc<S>,
    policy: ErrorPolicy,
    config: &RunConfig,
    workload: &Workload,
    ctx: ExecContext,
) -> Result<Report, LoadgenError> {
    setup(source.as_ref(), &workload.setup).await?;

    let ctx = match config.duration() {
        Some(duration) => ctx.with_timeout(duration),
        None => ctx,
    };
    let statements = workload.statements()?;
    let trx_names = workload.trx_names();
    let policy = Arc::new(policy);
    let options = ConnectOptions {
        default_db: config.default_db.clone(),
        connect_timeout: config.connect_timeout(),
        ..ConnectOptions::default()
    };
    let qps = config.qps.map(|rate| RateLimiter::per_second(rate, &ctx));
    let tps = config.tps.map(|rate| RateLimiter::per_second(rate, &ctx));
    let budget = config.total_iterations.map(IterBudget::new);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut per_client_stats = Vec::new();
    let started = Instant::now();

    for client in 1..=config.clients {
        let stats: Vec<Arc<TrxStats>> = trx_names
            .iter()
            .map(|name| Arc::new(TrxStats::new(name.clone())))
            .collect();
        let recorders = stats
            .iter()
            .map(|s| Some(Arc::clone(s) as Arc<dyn StatsRecorder>))
            .collect();
        per_client_stats.push(stats);

        let mut c = Client::new(
            Arc::clone(&source),
            Arc::clone(&statements),
            workload.bind(client),
            tx.clone(),
        )?
        .with_run_level(RunLevel {
            stage: 1,
            exec_group: 1,
            client_group: 1,
            client,
            trx: 0,
            query: 0,
        })
        .with_stats(recorders)
        .with_error_policy(Arc::clone(&policy))
        .with_options(options.clone())
        .with_iterations(config.iterations);
        if let Some(budget) = &budget {
            c = c.with_exec_group_budget(Arc::clone(budget));
        }
        if let Some(qps) = &qps {
            c = c.with_qps(Arc::clone(qps));
        }
        if let Some(tps) = &tps {
            c = c.with_tps(Arc::clone(tps));
        }
        tokio::spawn(c.run(ctx.clone()));
    }
    drop(tx);
    tracing::info!("{} clients running", config.clients);

    let mut clients = Vec::new();
    while let Some(done) = rx.recv().await {
        if let Some(err) = &done.error {
            tracing::error!("client {} failed: {err}", done.run_level.client_id());
        }
        clients.push(ClientReport::from(done));
    }
    clients.sort_by_key(|c| c.run_count.client);

    // Stop the limiter refill tasks once every client is done.
    ctx.cancel();

    Ok(Report {
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        clients,
        trx: merge_trx_stats(&trx_names, &per_client_stats),
    })
}
