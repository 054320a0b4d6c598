//! JSON workload files.
//!
//! ```json
//! {
//!   "setup": ["CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY, c INTEGER)"],
//!   "trx": [{
//!     "name": "rw",
//!     "statements": [
//!       {"query": "BEGIN", "begin": true},
//!       {"query": "SELECT c FROM t WHERE id = ?", "result_set": true,
//!        "inputs": [{"type": "random_int", "min": 1, "max": 100}], "outputs": ["@c"]},
//!       {"query": "UPDATE t SET c = ? + 1", "write": true,
//!        "inputs": [{"type": "column", "name": "@c"}]},
//!       {"query": "COMMIT", "commit": true}
//!     ]
//!   }]
//! }
//! ```
//!
//! Each trx's first statement opens its stats scope and its last closes it.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use sql_loadgen::prelude::*;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Workload {
    /// Run once, on one connection, before any client starts.
    #[serde(default)]
    pub(crate) setup: Vec<String>,
    pub(crate) trx: Vec<TrxSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TrxSpec {
    pub(crate) name: String,
    pub(crate) statements: Vec<StatementSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct StatementSpec {
    query: String,
    ddl: bool,
    write: bool,
    commit: bool,
    begin: bool,
    result_set: bool,
    prepare: bool,
    prepare_multi: usize,
    /// humantime duration; makes the statement a pure delay.
    idle: Option<String>,
    /// Rows this statement may write across all clients.
    limit_rows: Option<u64>,
    inputs: Vec<ValueSpec>,
    /// Column names receiving each result column; `_` discards a column.
    outputs: Option<Vec<String>>,
    insert_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ValueSpec {
    Const {
        value: serde_json::Value,
    },
    AutoInc {
        #[serde(default = "one")]
        start: i64,
        #[serde(default = "one")]
        step: i64,
    },
    RandomInt {
        min: i64,
        max: i64,
        seed: Option<u64>,
    },
    Column {
        name: String,
    },
    ClientId,
}

fn one() -> i64 {
    1
}

const DISCARD: &str = "_";

impl Workload {
    pub(crate) fn load(path: &Path) -> Result<Self, LoadgenError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoadgenError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub(crate) fn parse(text: &str) -> Result<Self, LoadgenError> {
        let workload: Workload = serde_json::from_str(text)
            .map_err(|e| LoadgenError::ConfigError(format!("invalid workload: {e}")))?;
        workload.validate()?;
        Ok(workload)
    }

    fn specs(&self) -> impl Iterator<Item = &StatementSpec> {
        self.trx.iter().flat_map(|trx| trx.statements.iter())
    }

    fn validate(&self) -> Result<(), LoadgenError> {
        if self.trx.is_empty() {
            return Err(LoadgenError::ConfigError("workload has no trx".into()));
        }
        let mut columns = HashSet::new();
        for spec in self.specs() {
            columns.extend(spec.outputs.iter().flatten().filter(|c| *c != DISCARD));
            columns.extend(spec.insert_id.iter());
        }
        for trx in &self.trx {
            if trx.statements.is_empty() {
                return Err(LoadgenError::ConfigError(format!(
                    "trx {} has no statements",
                    trx.name
                )));
            }
            for spec in &trx.statements {
                if spec.idle.is_none() && spec.query.trim().is_empty() {
                    return Err(LoadgenError::ConfigError(format!(
                        "trx {}: statement without a query",
                        trx.name
                    )));
                }
                for input in &spec.inputs {
                    match input {
                        ValueSpec::Column { name } if !columns.contains(name) => {
                            return Err(LoadgenError::ConfigError(format!(
                                "trx {}: column {name} is never written",
                                trx.name
                            )));
                        }
                        ValueSpec::RandomInt { min, max, .. } if min > max => {
                            return Err(LoadgenError::ConfigError(format!(
                                "trx {}: random_int min {min} > max {max}",
                                trx.name
                            )));
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn trx_names(&self) -> Vec<String> {
        self.trx.iter().map(|t| t.name.clone()).collect()
    }

    /// Statements shared by every client.
    pub(crate) fn statements(&self) -> Result<Arc<[Statement]>, LoadgenError> {
        let mut out = Vec::new();
        for trx in &self.trx {
            let first = out.len();
            for spec in &trx.statements {
                out.push(spec.to_statement()?);
            }
            let last = out.len() - 1;
            out[last].trx_boundary = TrxBoundary::End;
            out[first].trx_boundary = TrxBoundary::Begin;
        }
        Ok(Arc::from(out))
    }

    /// Fresh bindings for one client: generators and columns are never shared
    /// between clients.
    pub(crate) fn bind(&self, client: u32) -> Vec<StatementData> {
        let mut columns: HashMap<String, Arc<Column>> = HashMap::new();
        let mut column = |name: &str| {
            Arc::clone(
                columns
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(Column::new())),
            )
        };

        self.specs()
            .map(|spec| {
                let inputs = spec
                    .inputs
                    .iter()
                    .map(|input| -> Arc<dyn ValueProducer> {
                        match input {
                            ValueSpec::Const { value } => {
                                Arc::new(Constant(json_to_row_value(value)))
                            }
                            ValueSpec::AutoInc { start, step } => {
                                Arc::new(AutoInc::new(*start, *step))
                            }
                            ValueSpec::RandomInt { min, max, seed } => match seed {
                                Some(seed) => Arc::new(RandomInt::seeded(
                                    *min,
                                    *max,
                                    seed.wrapping_add(u64::from(client)),
                                )),
                                None => Arc::new(RandomInt::new(*min, *max)),
                            },
                            ValueSpec::Column { name } => column(name),
                            ValueSpec::ClientId => Arc::new(ClientIdValue),
                        }
                    })
                    .collect();
                let mut data = StatementData::default().with_inputs(inputs);
                if let Some(outputs) = &spec.outputs {
                    data = data.with_outputs(
                        outputs
                            .iter()
                            .map(|name| -> Arc<dyn ValueConsumer> {
                                if name == DISCARD {
                                    Arc::new(Column::new())
                                } else {
                                    column(name)
                                }
                            })
                            .collect(),
                    );
                }
                if let Some(name) = &spec.insert_id {
                    data = data.with_insert_id(column(name));
                }
                data
            })
            .collect()
    }
}

impl StatementSpec {
    fn to_statement(&self) -> Result<Statement, LoadgenError> {
        if let Some(idle) = &self.idle {
            let duration = humantime::parse_duration(idle)
                .map_err(|e| LoadgenError::ConfigError(format!("idle {idle}: {e}")))?;
            return Ok(Statement::idle(duration));
        }
        Ok(Statement {
            query: self.query.clone(),
            ddl: self.ddl,
            write: self.write,
            commit: self.commit,
            begin: self.begin,
            result_set: self.result_set,
            prepare: self.prepare,
            prepare_multi: self.prepare_multi,
            limit: self
                .limit_rows
                .map(|max| Arc::new(RowBudget::new(max)) as Arc<dyn RowLimit>),
            ..Statement::default()
        })
    }
}

fn json_to_row_value(value: &serde_json::Value) -> RowValues {
    use serde_json::Value;
    match value {
        Value::Null => RowValues::Null,
        Value::Bool(b) => RowValues::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => RowValues::Int(i),
            None => RowValues::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => RowValues::Text(s.clone()),
        other => RowValues::JSON(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKLOAD: &str = r#"{
        "setup": ["CREATE TABLE t (id INTEGER PRIMARY KEY, c INTEGER)"],
        "trx": [{
            "name": "rw",
            "statements": [
                {"query": "INSERT INTO t (c) VALUES (?)", "write": true,
                 "inputs": [{"type": "const", "value": 7}], "insert_id": "@id"},
                {"idle": "5ms"},
                {"query": "SELECT c FROM t WHERE id = ?", "result_set": true,
                 "inputs": [{"type": "column", "name": "@id"}], "outputs": ["@c"]}
            ]
        }, {
            "name": "ro",
            "statements": [{"query": "SELECT ?", "result_set": true,
                            "inputs": [{"type": "client_id"}], "outputs": ["_"]}]
        }]
    }"#;

    #[test]
    fn statements_get_trx_boundaries() {
        let workload = Workload::parse(WORKLOAD).unwrap();
        let stmts = workload.statements().unwrap();
        assert_eq!(stmts.len(), 4);
        assert_eq!(stmts[0].trx_boundary, TrxBoundary::Begin);
        assert!(stmts[1].is_idle());
        assert_eq!(stmts[2].trx_boundary, TrxBoundary::End);
        assert_eq!(stmts[3].trx_boundary, TrxBoundary::Begin);
        assert_eq!(workload.trx_names(), vec!["rw", "ro"]);
    }

    #[test]
    fn columns_are_shared_within_a_client() {
        let workload = Workload::parse(WORKLOAD).unwrap();
        let data = workload.bind(1);
        assert_eq!(data.len(), 4);
        let id = data[0].insert_id.clone().unwrap();
        id.scan(RowValues::Int(9));
        let rc = RunCount::default();
        assert_eq!(data[2].inputs[0].values(&rc), vec![RowValues::Int(9)]);

        // A second client gets its own column.
        let other = workload.bind(2);
        assert_eq!(other[2].inputs[0].values(&rc), vec![RowValues::Null]);
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let err = Workload::parse(
            r#"{"trx": [{"name": "x", "statements": [
                {"query": "SELECT ?", "inputs": [{"type": "column", "name": "@nope"}]}
            ]}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("@nope"));
    }

    #[test]
    fn json_values_map_to_row_values() {
        assert_eq!(json_to_row_value(&serde_json::json!(3)), RowValues::Int(3));
        assert_eq!(json_to_row_value(&serde_json::json!(1.5)), RowValues::Float(1.5));
        assert_eq!(json_to_row_value(&serde_json::json!("a")), RowValues::Text("a".into()));
        assert_eq!(json_to_row_value(&serde_json::json!(null)), RowValues::Null);
    }
}
