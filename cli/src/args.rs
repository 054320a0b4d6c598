use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use sql_loadgen::types::DatabaseType;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a SQL workload from many concurrent clients")]
pub(crate) struct Args {
    /// Workload file (JSON).
    pub(crate) workload: PathBuf,
    #[arg(long, value_enum, default_value = "sqlite")]
    pub(crate) backend: DatabaseType,
    /// SQLite database file or `postgres://` URL.
    #[arg(long)]
    pub(crate) dsn: String,
    #[arg(long, default_value_t = 1)]
    pub(crate) clients: u32,
    /// Iterations per client; 0 runs until `--duration` or CTRL-C.
    #[arg(long, default_value_t = 0)]
    pub(crate) iterations: u64,
    /// Iterations shared by all clients.
    #[arg(long)]
    pub(crate) total_iterations: Option<u64>,
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    /// Statements per second across all clients.
    #[arg(long)]
    pub(crate) qps: Option<u32>,
    /// Transactions per second across all clients.
    #[arg(long)]
    pub(crate) tps: Option<u32>,
    /// Database (Postgres: schema) selected on every connect.
    #[arg(long)]
    pub(crate) default_db: Option<String>,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "500ms")]
    pub(crate) connect_timeout: Duration,
    #[arg(long)]
    pub(crate) pool_size: Option<u32>,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long, short)]
    pub(crate) verbose: bool,
}

/// Effective run settings, logged at start.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RunConfig {
    pub(crate) workload: PathBuf,
    pub(crate) backend: DatabaseType,
    pub(crate) dsn: String,
    pub(crate) clients: u32,
    pub(crate) iterations: u64,
    pub(crate) total_iterations: Option<u64>,
    pub(crate) duration_ms: Option<u64>,
    pub(crate) qps: Option<u32>,
    pub(crate) tps: Option<u32>,
    pub(crate) default_db: Option<String>,
    pub(crate) connect_timeout_ms: u64,
    pub(crate) pool_size: u32,
    pub(crate) log: Option<PathBuf>,
    pub(crate) verbose: bool,
}

impl RunConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let clients = args.clients.max(1);
        RunConfig {
            workload: args.workload,
            backend: args.backend,
            dsn: args.dsn,
            clients,
            iterations: args.iterations,
            total_iterations: args.total_iterations,
            duration_ms: args.duration.map(duration_ms),
            qps: args.qps.filter(|n| *n > 0),
            tps: args.tps.filter(|n| *n > 0),
            default_db: args.default_db,
            connect_timeout_ms: duration_ms(args.connect_timeout),
            // One connection per client, plus one for setup.
            pool_size: args.pool_size.unwrap_or(clients + 1).max(1),
            log: args.log,
            verbose: args.verbose,
        }
    }

    pub(crate) fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_size_the_pool_for_every_client() {
        let args = Args::parse_from(["sql-loadgen", "w.json", "--dsn", "x.db", "--clients", "4"]);
        let config = RunConfig::from_args(args);
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.connect_timeout(), Duration::from_millis(500));
        assert!(config.duration().is_none());
    }

    #[test]
    fn humantime_durations() {
        let args = Args::parse_from([
            "sql-loadgen",
            "w.json",
            "--dsn",
            "x.db",
            "--duration",
            "1m 30s",
            "--qps",
            "0",
        ]);
        let config = RunConfig::from_args(args);
        assert_eq!(config.duration_ms, Some(90_000));
        assert!(config.qps.is_none());
    }
}
