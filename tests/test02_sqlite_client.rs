#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sql_loadgen::prelude::*;
use tempfile::TempDir;
use tokio::sync::mpsc;

async fn setup(dir: &TempDir) -> Result<Arc<SqliteSource>, LoadgenError> {
    let path = dir.path().join("load.db");
    let source = SqliteSource::builder(path.to_string_lossy())
        .pool_size(4)
        .build()
        .await?;
    source
        .execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, c INTEGER NOT NULL, note TEXT);",
        )
        .await?;
    Ok(Arc::new(source))
}

async fn count_rows(source: &SqliteSource, sql: &str) -> Result<i64, LoadgenError> {
    let mut conn = source.acquire().await?;
    let rs = conn.query(sql).await?;
    conn.close().await;
    rs.rows()
        .first()
        .and_then(|row| row.first())
        .and_then(RowValues::as_int)
        .ok_or_else(|| LoadgenError::ExecutionError("no count".into()))
}

#[tokio::test]
async fn clients_share_a_row_budget() -> Result<(), LoadgenError> {
    let dir = tempfile::tempdir().map_err(|e| LoadgenError::ConfigError(e.to_string()))?;
    let source = setup(&dir).await?;

    let budget = Arc::new(RowBudget::new(20));
    let insert = Statement {
        write: true,
        prepare: true,
        limit: Some(budget.clone() as Arc<dyn RowLimit>),
        ..Statement::new("INSERT INTO t (c, note) VALUES (?, ?)")
    };
    let statements: Arc<[Statement]> = Arc::from(vec![insert]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handles = Vec::new();
    for client_no in 1..=2 {
        let data = vec![StatementData::default().with_inputs(vec![
            Arc::new(AutoInc::new(1, 1)) as Arc<dyn ValueProducer>,
            Arc::new(Constant(RowValues::Text("load".into()))),
        ])];
        let client = Client::new(Arc::clone(&source), Arc::clone(&statements), data, tx.clone())?
            .with_run_level(RunLevel {
                client: client_no,
                ..RunLevel::default()
            })
            .with_error_policy(Arc::new(ErrorPolicy::sqlite()));
        handles.push(tokio::spawn(client.run(ExecContext::default())));
    }
    drop(tx);

    let mut outcomes = Vec::new();
    while let Some(done) = rx.recv().await {
        outcomes.push(done);
    }
    for handle in handles {
        handle.await.map_err(|e| LoadgenError::ExecutionError(e.to_string()))?;
    }

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|done| done.error.is_none()));
    let rows = count_rows(&source, "SELECT COUNT(*) FROM t").await?;
    assert!((20..=21).contains(&rows), "wrote {rows} rows");
    assert_eq!(budget.written(), u64::try_from(rows).unwrap_or_default());
    Ok(())
}

#[tokio::test]
async fn insert_id_feeds_a_lookup() -> Result<(), LoadgenError> {
    let dir = tempfile::tempdir().map_err(|e| LoadgenError::ConfigError(e.to_string()))?;
    let source = setup(&dir).await?;

    let id = Arc::new(Column::new());
    let c = Arc::new(Column::new());
    let statements: Arc<[Statement]> = Arc::from(vec![
        Statement {
            write: true,
            ..Statement::new("INSERT INTO t (c) VALUES (?)")
        },
        Statement {
            result_set: true,
            prepare: true,
            ..Statement::new("SELECT c FROM t WHERE id = ?")
        },
    ]);
    let data = vec![
        StatementData::default()
            .with_inputs(vec![Arc::new(Constant(RowValues::Int(314))) as Arc<dyn ValueProducer>])
            .with_insert_id(id.clone()),
        StatementData::default()
            .with_inputs(vec![id.clone() as Arc<dyn ValueProducer>])
            .with_outputs(vec![c.clone() as Arc<dyn ValueConsumer>]),
    ];

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::new(Arc::clone(&source), statements, data, tx)?.with_iterations(3);
    client.run(ExecContext::default()).await;

    let done = rx.recv().await.expect("client reports its outcome");
    assert!(done.error.is_none());
    assert_eq!(done.run_count.iter, 3);
    assert_eq!(id.get(), RowValues::Int(3));
    assert_eq!(c.get(), RowValues::Int(314));
    Ok(())
}

#[tokio::test]
async fn duplicate_keys_continue_and_are_counted() -> Result<(), LoadgenError> {
    let dir = tempfile::tempdir().map_err(|e| LoadgenError::ConfigError(e.to_string()))?;
    let source = setup(&dir).await?;

    let stats = Arc::new(TrxStats::new("dup"));
    let statements: Arc<[Statement]> = Arc::from(vec![Statement {
        write: true,
        trx_boundary: TrxBoundary::Begin,
        ..Statement::new("INSERT INTO t (id, c) VALUES (1, 1)")
    }]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::new(
        Arc::clone(&source),
        statements,
        vec![StatementData::default()],
        tx,
    )?
    .with_iterations(3)
    .with_error_policy(Arc::new(ErrorPolicy::sqlite()))
    .with_stats(vec![Some(stats.clone() as Arc<dyn StatsRecorder>)]);
    client.run(ExecContext::default()).await;

    let done = rx.recv().await.expect("client reports its outcome");
    assert!(done.error.is_none());
    assert_eq!(done.run_count.conn, 1);
    let snapshot = stats.snapshot();
    // SQLITE_CONSTRAINT_PRIMARYKEY
    assert_eq!(snapshot.errors.get("1555"), Some(&2));
    assert_eq!(snapshot.write.count, 3);
    Ok(())
}

#[tokio::test]
async fn schema_errors_abort_the_client() -> Result<(), LoadgenError> {
    let dir = tempfile::tempdir().map_err(|e| LoadgenError::ConfigError(e.to_string()))?;
    let source = setup(&dir).await?;

    let statements: Arc<[Statement]> = Arc::from(vec![
        Statement {
            result_set: true,
            ..Statement::new("SELECT 1")
        },
        Statement {
            ddl: true,
            ..Statement::new("CREATE TABLE t (id INTEGER)")
        },
    ]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::new(
        Arc::clone(&source),
        statements,
        vec![StatementData::default(); 2],
        tx,
    )?;
    client.run(ExecContext::default()).await;

    let done = rx.recv().await.expect("client reports its outcome");
    let err = done.error.expect("creating an existing table fails");
    assert_eq!(err.statement_no, Some(1));
    assert!(matches!(err.err, LoadgenError::Ddl(_)));
    assert_eq!(err.err.code().as_deref(), Some("1"));
    Ok(())
}

/// Yields `NULL` on the first call and `1` afterwards.
struct NullOnce(AtomicBool);

impl ValueProducer for NullOnce {
    fn values(&self, _rc: &RunCount) -> Vec<RowValues> {
        if self.0.swap(true, Ordering::Relaxed) {
            vec![RowValues::Int(1)]
        } else {
            vec![RowValues::Null]
        }
    }
}

#[tokio::test]
async fn reconnect_inside_a_trx_gets_a_clean_session() -> Result<(), LoadgenError> {
    let dir = tempfile::tempdir().map_err(|e| LoadgenError::ConfigError(e.to_string()))?;
    let path = dir.path().join("load.db");
    // One pooled connection: the reconnect gets the same one back.
    let source = Arc::new(
        SqliteSource::builder(path.to_string_lossy())
            .pool_size(1)
            .build()
            .await?,
    );
    source
        .execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, c INTEGER NOT NULL);",
        )
        .await?;

    let statements: Arc<[Statement]> = Arc::from(vec![
        Statement {
            begin: true,
            trx_boundary: TrxBoundary::Begin,
            ..Statement::new("BEGIN")
        },
        Statement {
            write: true,
            ..Statement::new("INSERT INTO t (c) VALUES (?)")
        },
        Statement {
            commit: true,
            trx_boundary: TrxBoundary::End,
            ..Statement::new("COMMIT")
        },
    ]);
    let c: Arc<dyn ValueProducer> = Arc::new(NullOnce(AtomicBool::new(false)));
    let data = vec![
        StatementData::default(),
        StatementData::default().with_inputs(vec![c]),
        StatementData::default(),
    ];

    let (tx, mut rx) = mpsc::unbounded_channel();
    // SQLITE_CONSTRAINT_NOTNULL (1299) has no policy flags, so it reconnects.
    let client = Client::new(Arc::clone(&source), statements, data, tx)?
        .with_iterations(3)
        .with_error_policy(Arc::new(ErrorPolicy::sqlite()));
    client.run(ExecContext::default()).await;

    let done = rx.recv().await.expect("client reports its outcome");
    assert!(done.error.is_none(), "client failed: {:?}", done.error);
    assert_eq!(done.run_count.conn, 2);
    assert_eq!(done.run_count.iter, 3);
    assert_eq!(count_rows(&source, "SELECT COUNT(*) FROM t").await?, 2);
    Ok(())
}
