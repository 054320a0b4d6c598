//! One logical client: a connection, its prepared statements, and the loop that
//! executes the workload's statements on them.
//!
//! A [`Client`] is built once, then consumed by [`Client::run`], which publishes
//! exactly one [`ClientDone`] on the completion channel however the run ends.

mod connect;
mod run;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::backend::{ClientConnection, ConnectionSource};
use crate::classify::ErrorPolicy;
use crate::data::{RunCount, StatementData};
use crate::error::{ClientError, LoadgenError};
use crate::limit::{IterBudget, RateLimiter};
use crate::run_level::RunLevel;
use crate::stats::StatsRecorder;
use crate::trx::Statement;
use crate::types::RowValues;

/// Per-attempt connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// Wait after closing a connection and between connect attempts.
pub const CONNECT_RETRY_WAIT: Duration = Duration::from_millis(200);

/// Connection settings applied on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Default database/schema selected right after connecting.
    pub default_db: Option<String>,
    pub connect_timeout: Duration,
    pub retry_wait: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            default_db: None,
            connect_timeout: CONNECT_TIMEOUT,
            retry_wait: CONNECT_RETRY_WAIT,
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn with_default_db(mut self, db: impl Into<String>) -> Self {
        self.default_db = Some(db.into());
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }
}

/// Terminal outcome of one client, sent on the completion channel.
#[derive(Debug)]
pub struct ClientDone {
    pub run_level: RunLevel,
    /// `None` when the client stopped cleanly: budget reached, row limit, or cancellation.
    pub error: Option<ClientError>,
    pub run_count: RunCount,
}

/// Prepared handles of one connection, grouped so that consecutive statements
/// can share a handle.
struct PreparedSet<P> {
    /// Group of each statement slot, if it uses a prepared handle.
    slot_group: Vec<Option<usize>>,
    /// Statement whose query each group prepares.
    leaders: Vec<usize>,
    handles: Vec<Option<P>>,
}

impl<P> PreparedSet<P> {
    fn new(statements: &[Statement]) -> Self {
        let mut slot_group = vec![None; statements.len()];
        let mut leaders = Vec::new();
        for (i, stmt) in statements.iter().enumerate() {
            if !stmt.prepare || slot_group[i].is_some() {
                continue;
            }
            let group = leaders.len();
            leaders.push(i);
            let end = (i + stmt.prepare_multi.max(1)).min(statements.len());
            for slot in &mut slot_group[i..end] {
                if slot.is_none() {
                    *slot = Some(group);
                }
            }
        }
        let handles = leaders.iter().map(|_| None).collect();
        Self {
            slot_group,
            leaders,
            handles,
        }
    }

    fn get(&self, slot: usize) -> Option<&P> {
        self.slot_group
            .get(slot)
            .copied()
            .flatten()
            .and_then(|group| self.handles[group].as_ref())
    }

    fn take_all(&mut self) -> Vec<P> {
        self.handles.iter_mut().filter_map(Option::take).collect()
    }
}

/// Executes a workload's statements on one connection until cancelled, out of
/// budget, or stopped by a fatal error.
pub struct Client<S: ConnectionSource> {
    source: Arc<S>,
    statements: Arc<[Statement]>,
    data: Vec<StatementData>,
    done: UnboundedSender<ClientDone>,
    run_level: RunLevel,
    stats: Vec<Option<Arc<dyn StatsRecorder>>>,
    policy: Arc<ErrorPolicy>,

    options: ConnectOptions,
    iter_exec_group: Option<Arc<IterBudget>>,
    iter_client_group: Option<Arc<IterBudget>>,
    iter: u64,
    qps: Option<Arc<RateLimiter>>,
    tps: Option<Arc<RateLimiter>>,

    conn: Option<S::Conn>,
    prepared: PreparedSet<<S::Conn as ClientConnection>::Prepared>,
    values: Vec<Vec<RowValues>>,
    rc: RunCount,
}

impl<S: ConnectionSource> Client<S> {
    /// Build a client over `statements`, with one binding per statement.
    ///
    /// # Errors
    /// Returns [`LoadgenError::ConfigError`] if `data` does not match `statements`
    /// or a prepared group runs past the last statement.
    pub fn new(
        source: Arc<S>,
        statements: Arc<[Statement]>,
        data: Vec<StatementData>,
        done: UnboundedSender<ClientDone>,
    ) -> Result<Self, LoadgenError> {
        if data.len() != statements.len() {
            return Err(LoadgenError::ConfigError(format!(
                "{} statements but {} statement bindings",
                statements.len(),
                data.len()
            )));
        }
        for (i, stmt) in statements.iter().enumerate() {
            if stmt.prepare && i + stmt.prepare_multi.max(1) > statements.len() {
                return Err(LoadgenError::ConfigError(format!(
                    "statement {i} prepares {} statements but only {} follow",
                    stmt.prepare_multi,
                    statements.len() - i
                )));
            }
        }

        let prepared = PreparedSet::new(&statements);
        let values = data.iter().map(|d| Vec::with_capacity(d.inputs.len())).collect();
        Ok(Self {
            source,
            statements,
            data,
            done,
            run_level: RunLevel::default(),
            stats: Vec::new(),
            policy: Arc::new(ErrorPolicy::empty()),
            options: ConnectOptions::default(),
            iter_exec_group: None,
            iter_client_group: None,
            iter: 0,
            qps: None,
            tps: None,
            conn: None,
            prepared,
            values,
            rc: RunCount::default(),
        })
    }

    #[must_use]
    pub fn with_run_level(mut self, run_level: RunLevel) -> Self {
        self.run_level = run_level;
        self
    }

    /// One recorder slot per logical trx, indexed by trx order within an iteration.
    #[must_use]
    pub fn with_stats(mut self, stats: Vec<Option<Arc<dyn StatsRecorder>>>) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn with_error_policy(mut self, policy: Arc<ErrorPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_exec_group_budget(mut self, budget: Arc<IterBudget>) -> Self {
        self.iter_exec_group = Some(budget);
        self
    }

    #[must_use]
    pub fn with_client_group_budget(mut self, budget: Arc<IterBudget>) -> Self {
        self.iter_client_group = Some(budget);
        self
    }

    /// Stop after `iter` iterations of this client; 0 means no limit.
    #[must_use]
    pub fn with_iterations(mut self, iter: u64) -> Self {
        self.iter = iter;
        self
    }

    #[must_use]
    pub fn with_qps(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.qps = Some(limiter);
        self
    }

    #[must_use]
    pub fn with_tps(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.tps = Some(limiter);
        self
    }

    #[must_use]
    pub fn run_level(&self) -> &RunLevel {
        &self.run_level
    }
}
