//! Statement input and output bindings.
//!
//! Inputs are [`ValueProducer`]s invoked once per execution with the client's
//! [`RunCount`]; outputs are [`ValueConsumer`]s fed one column each from result rows.
//! A [`Column`] is both, which is how a value read by one statement becomes the
//! input of a later one.

mod generators;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::run_level::RunLevel;
use crate::types::RowValues;

pub use generators::{AutoInc, ClientIdValue, Column, Constant, RandomInt};

/// Per-client execution counters passed to every value producer.
///
/// The identity fields are fixed at client start; the counts follow the loop:
/// `iter` once per iteration, `trx` on each trx-begin statement, `statement` on
/// each non-idle statement, `conn` on every successful (re)connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunCount {
    pub conn: u64,
    pub iter: u64,
    pub trx: u64,
    pub statement: u64,
    pub client: u32,
    pub client_group: u32,
    pub exec_group: u32,
    pub stage: u32,
}

impl RunCount {
    #[must_use]
    pub fn for_client(rl: &RunLevel) -> Self {
        Self {
            client: rl.client,
            client_group: rl.client_group,
            exec_group: rl.exec_group,
            stage: rl.stage,
            ..Self::default()
        }
    }
}

/// Produces input values for one statement execution.
///
/// May be called any number of times and may return zero or more values; a
/// producer that fills a multi-row `VALUES` clause returns one value per placeholder.
pub trait ValueProducer: Send + Sync {
    fn values(&self, rc: &RunCount) -> Vec<RowValues>;
}

/// Accepts one output column value from a result row.
pub trait ValueConsumer: Send + Sync {
    fn scan(&self, value: RowValues);
}

impl<F> ValueProducer for F
where
    F: Fn(&RunCount) -> Vec<RowValues> + Send + Sync,
{
    fn values(&self, rc: &RunCount) -> Vec<RowValues> {
        self(rc)
    }
}

/// Runtime bindings of one statement.
#[derive(Clone, Default)]
pub struct StatementData {
    /// Input producers, in placeholder order.
    pub inputs: Vec<Arc<dyn ValueProducer>>,
    /// Output consumers, one per result column; `None` means results are discarded.
    pub outputs: Option<Vec<Arc<dyn ValueConsumer>>>,
    /// Receives the auto-generated id of an insert.
    pub insert_id: Option<Arc<dyn ValueConsumer>>,
}

impl StatementData {
    #[must_use]
    pub fn with_inputs(mut self, inputs: Vec<Arc<dyn ValueProducer>>) -> Self {
        self.inputs = inputs;
        self
    }

    #[must_use]
    pub fn with_outputs(mut self, outputs: Vec<Arc<dyn ValueConsumer>>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    #[must_use]
    pub fn with_insert_id(mut self, consumer: Arc<dyn ValueConsumer>) -> Self {
        self.insert_id = Some(consumer);
        self
    }

    /// Append every producer's values to `buf`, replacing its previous contents.
    pub(crate) fn bind(&self, rc: &RunCount, buf: &mut Vec<RowValues>) {
        buf.clear();
        for input in &self.inputs {
            buf.extend(input.values(rc));
        }
    }
}

impl fmt::Debug for StatementData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementData")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.as_ref().map(Vec::len))
            .field("insert_id", &self.insert_id.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_appends_across_producers() {
        let pair: Arc<dyn ValueProducer> =
            Arc::new(|_: &RunCount| vec![RowValues::Int(1), RowValues::Int(2)]);
        let iter: Arc<dyn ValueProducer> =
            Arc::new(|rc: &RunCount| vec![RowValues::Int(rc.iter as i64)]);
        let data = StatementData::default().with_inputs(vec![pair, iter]);

        let rc = RunCount {
            iter: 9,
            ..RunCount::default()
        };
        let mut buf = vec![RowValues::Null; 5];
        data.bind(&rc, &mut buf);
        assert_eq!(
            buf,
            vec![RowValues::Int(1), RowValues::Int(2), RowValues::Int(9)]
        );
    }

    #[test]
    fn run_count_copies_identity() {
        let rl = RunLevel {
            stage: 1,
            exec_group: 2,
            client_group: 3,
            client: 4,
            ..RunLevel::default()
        };
        let rc = RunCount::for_client(&rl);
        assert_eq!((rc.stage, rc.exec_group, rc.client_group, rc.client), (1, 2, 3, 4));
        assert_eq!(rc.iter, 0);
    }
}
