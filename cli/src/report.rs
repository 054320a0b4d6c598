use std::sync::Arc;

use serde::Serialize;
use sql_loadgen::prelude::*;

#[derive(Debug, Serialize)]
pub(crate) struct ClientReport {
    pub(crate) client: String,
    pub(crate) run_count: RunCount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) statement_no: Option<usize>,
}

impl From<ClientDone> for ClientReport {
    fn from(done: ClientDone) -> Self {
        ClientReport {
            client: done.run_level.client_id(),
            run_count: done.run_count,
            statement_no: done.error.as_ref().and_then(|e| e.statement_no),
            error: done.error.map(|e| e.err.to_string()),
        }
    }
}

/// Summary printed as JSON on stdout when the run ends.
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    pub(crate) elapsed_ms: u64,
    pub(crate) clients: Vec<ClientReport>,
    /// Stats of each trx, summed over all clients.
    pub(crate) trx: Vec<StatsSnapshot>,
}

impl Report {
    pub(crate) fn failed_clients(&self) -> usize {
        self.clients.iter().filter(|c| c.error.is_some()).count()
    }
}

/// Sum per-client stats of the same trx.
pub(crate) fn merge_trx_stats(
    names: &[String],
    per_client: &[Vec<Arc<TrxStats>>],
) -> Vec<StatsSnapshot> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut total = StatsSnapshot {
                name: name.clone(),
                ..StatsSnapshot::default()
            };
            for client in per_client {
                if let Some(stats) = client.get(i) {
                    total.merge(&stats.snapshot());
                }
            }
            total
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trx_stats_are_summed_by_position() {
        let names = vec!["a".to_string(), "b".to_string()];
        let client = |read_us: i64| {
            let a = Arc::new(TrxStats::new("a"));
            a.record(Category::Read, read_us);
            a.record_error(Some("5"));
            vec![a, Arc::new(TrxStats::new("b"))]
        };
        let merged = merge_trx_stats(&names, &[client(10), client(30)]);
        assert_eq!(merged[0].name, "a");
        assert_eq!(merged[0].read.count, 2);
        assert_eq!(merged[0].read.min_us, 10);
        assert_eq!(merged[0].read.max_us, 30);
        assert_eq!(merged[0].error_count(), 2);
        assert_eq!(merged[1].read.count, 0);
    }

    #[test]
    fn failed_clients_are_counted() {
        let report = Report {
            elapsed_ms: 1,
            clients: vec![
                ClientReport {
                    client: "1/1/1/1".into(),
                    run_count: RunCount::default(),
                    error: None,
                    statement_no: None,
                },
                ClientReport {
                    client: "1/1/1/2".into(),
                    run_count: RunCount::default(),
                    error: Some("boom".into()),
                    statement_no: Some(0),
                },
            ],
            trx: vec![],
        };
        assert_eq!(report.failed_clients(), 1);
    }
}
