#![doc = r#"
# sql-loadgen

Per-client execution engine for SQL load generation.

A [`Client`](client::Client) owns one database connection and runs a fixed list
of [`Statement`](trx::Statement)s over and over: it binds generated input values,
scans result columns back into shared values, records per-trx latency, and keeps
going through transient database errors by classifying them and reconnecting.

Iteration caps, row limits and rate limiters bound the work; an
[`ExecContext`](context::ExecContext) cancels it. Every client reports exactly
once on its completion channel.

## Example

```rust,no_run
use std::sync::Arc;

use sql_loadgen::prelude::*;

# async fn example() -> Result<(), LoadgenError> {
let source = Arc::new(SqliteSource::builder("load.db").build().await?);
let statements: Arc<[Statement]> = Arc::from(vec![Statement::new("SELECT 1")]);
let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

let client = Client::new(source, statements, vec![StatementData::default()], tx)?
    .with_iterations(100)
    .with_error_policy(Arc::new(ErrorPolicy::sqlite()));
tokio::spawn(client.run(ExecContext::default()));

if let Some(done) = rx.recv().await {
    assert!(done.error.is_none());
}
# Ok(())
# }
```
"#]

pub mod backend;
pub mod classify;
pub mod client;
pub mod context;
pub mod data;
pub mod error;
pub mod limit;
pub mod literal;
pub mod prelude;
pub mod results;
pub mod run_level;
pub mod stats;
pub mod trx;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::{Client, ClientDone, ConnectOptions};
pub use error::{ClientError, LoadgenError};
