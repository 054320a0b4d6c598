use std::error::Error;

use async_trait::async_trait;
use deadpool_postgres::{Config as PgConfig, Object, Pool, Runtime};
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{NoTls, Row, Statement};
use tokio_util::bytes;

use super::{ClientConnection, ConnectionSource};
use crate::error::LoadgenError;
use crate::results::ResultSet;
use crate::types::{ExecResult, RowValues};

/// deadpool pool of Postgres clients.
#[derive(Clone)]
pub struct PostgresSource {
    pool: Pool,
}

impl PostgresSource {
    /// Build the pool from a deadpool config.
    ///
    /// # Errors
    /// Returns `LoadgenError::ConfigError` if required config fields are missing or
    /// `LoadgenError::ConnectionError` if pool creation fails.
    pub fn new(pg_config: PgConfig) -> Result<Self, LoadgenError> {
        if pg_config.url.is_none() {
            for (field, missing) in [
                ("dbname", pg_config.dbname.is_none()),
                ("host", pg_config.host.is_none() && pg_config.hosts.is_none()),
                ("user", pg_config.user.is_none()),
            ] {
                if missing {
                    return Err(LoadgenError::ConfigError(format!("{field} is required")));
                }
            }
        }

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                LoadgenError::ConnectionError(format!("Failed to create Postgres pool: {e}"))
            })?;
        Ok(Self { pool })
    }

    /// Build the pool from a `postgres://` URL.
    ///
    /// # Errors
    /// Same as [`PostgresSource::new`].
    pub fn from_url(url: &str, pool_size: usize) -> Result<Self, LoadgenError> {
        let mut cfg = PgConfig::new();
        cfg.url = Some(url.to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(pool_size.max(1)));
        Self::new(cfg)
    }
}

#[async_trait]
impl ConnectionSource for PostgresSource {
    type Conn = PostgresConnection;

    async fn acquire(&self) -> Result<Self::Conn, LoadgenError> {
        let client = self.pool.get().await?;
        Ok(PostgresConnection { client })
    }
}

/// Pooled Postgres client checked out by one client.
pub struct PostgresConnection {
    client: Object,
}

#[async_trait]
impl ClientConnection for PostgresConnection {
    type Prepared = Statement;

    async fn prepare(&mut self, sql: &str) -> Result<Self::Prepared, LoadgenError> {
        Ok(self.client.prepare(sql).await?)
    }

    async fn close_prepared(&mut self, ps: Self::Prepared) {
        // Dropping the last reference closes the server-side statement.
        drop(ps);
    }

    async fn query(&mut self, sql: &str) -> Result<ResultSet, LoadgenError> {
        let rows = self.client.query(sql, &[]).await?;
        build_result_set(&rows)
    }

    async fn query_prepared(
        &mut self,
        ps: &Self::Prepared,
        params: &[RowValues],
    ) -> Result<ResultSet, LoadgenError> {
        let rows = self.client.query(ps, &as_refs(params)).await?;
        let mut result_set = build_result_set(&rows)?;
        if rows.is_empty() {
            let cols = ps.columns().iter().map(|c| c.name().to_string()).collect();
            result_set = ResultSet::new(cols);
        }
        Ok(result_set)
    }

    async fn execute(&mut self, sql: &str) -> Result<ExecResult, LoadgenError> {
        let rows_affected = self.client.execute(sql, &[]).await?;
        Ok(ExecResult {
            rows_affected,
            last_insert_id: None,
        })
    }

    async fn execute_prepared(
        &mut self,
        ps: &Self::Prepared,
        params: &[RowValues],
    ) -> Result<ExecResult, LoadgenError> {
        let rows_affected = self.client.execute(ps, &as_refs(params)).await?;
        Ok(ExecResult {
            rows_affected,
            last_insert_id: None,
        })
    }

    async fn use_database(&mut self, name: &str) -> Result<(), LoadgenError> {
        self.client
            .batch_execute(&format!("SET search_path TO {}", quote_ident(name)))
            .await?;
        Ok(())
    }

    /// Detach the client from the pool and drop it, ending the session along
    /// with any transaction or statement still open on it.
    async fn close(self) {
        drop(Object::take(self.client));
    }
}

/// Quote `name` as a Postgres identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn as_refs(params: &[RowValues]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn build_result_set(rows: &[Row]) -> Result<ResultSet, LoadgenError> {
    let cols: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let mut result_set = ResultSet::with_capacity(cols, rows.len());
    for row in rows {
        let col_count = row.columns().len();
        let mut values = Vec::with_capacity(col_count);
        for idx in 0..col_count {
            values.push(extract_value(row, idx)?);
        }
        result_set.add_row_values(values);
    }
    Ok(result_set)
}

fn extract_value(row: &Row, idx: usize) -> Result<RowValues, LoadgenError> {
    let ty = row.columns()[idx].type_().clone();
    let value = match ty {
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| RowValues::Int(i64::from(v))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| RowValues::Int(i64::from(v))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(RowValues::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| RowValues::Float(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(RowValues::Float),
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(RowValues::Bool),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(RowValues::Timestamp),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(RowValues::JSON),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(RowValues::Blob),
        _ => row.try_get::<_, Option<String>>(idx)?.map(RowValues::Text),
    };
    Ok(value.unwrap_or(RowValues::Null))
}

impl ToSql for RowValues {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            RowValues::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            #[allow(clippy::cast_possible_truncation)]
            RowValues::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            RowValues::Text(s) => s.to_sql(ty, out),
            RowValues::Bool(b) => b.to_sql(ty, out),
            RowValues::Timestamp(dt) => dt.to_sql(ty, out),
            RowValues::Null => Ok(IsNull::Yes),
            RowValues::JSON(v) => v.to_sql(ty, out),
            RowValues::Blob(bytes) => bytes.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::CHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_are_quoted() {
        assert_eq!(quote_ident("load"), r#""load""#);
        assert_eq!(quote_ident(r#"a"; DROP"#), r#""a""; DROP""#);
    }

    #[test]
    fn missing_fields_are_config_errors() {
        let mut cfg = PgConfig::new();
        cfg.host = Some("localhost".into());
        cfg.user = Some("postgres".into());
        let err = PostgresSource::new(cfg).err();
        assert!(matches!(err, Some(LoadgenError::ConfigError(msg)) if msg == "dbname is required"));
    }

    #[test]
    fn row_values_accept_common_types() {
        assert!(<RowValues as ToSql>::accepts(&Type::INT4));
        assert!(<RowValues as ToSql>::accepts(&Type::JSONB));
        assert!(!<RowValues as ToSql>::accepts(&Type::POINT));
    }
}
