//! PostgreSQL access with two named execution modes.
//!
//! - **strict** — parameter-bound execution; database errors propagate to
//!   the caller. The aggregation endpoints use this: their callers need to
//!   tell "no data" from "query failed".
//! - **tolerant** — raw-statement execution for the conversational
//!   pipeline's model-generated SQL; database errors are logged and
//!   swallowed into an empty row set so synthesis can still report
//!   "no data" instead of the whole request crashing.
//!
//! The two policies coexist deliberately; do not unify them.
//!
//! Rows come back as ordered field→JSON mappings (SELECT column order),
//! with dates rendered `YYYY-MM-DD`. Connections are checked out of the
//! pool per call and returned on every exit path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};

use crate::config::DatabaseConfig;

/// One result row: field name → JSON value, in SELECT column order.
pub type Row = Map<String, Value>;

/// A bindable SQL parameter. Covers everything the aggregation queries
/// pass; model-generated SQL never goes through the bound path.
#[derive(Debug, Clone)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
}

/// Read-only SQL execution seam, injected into the pipeline and the
/// aggregation services.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute with parameter binding (`$1..$n`); database errors propagate.
    async fn fetch_strict(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>>;

    /// Execute a raw statement; database errors degrade to an empty result
    /// set. Legacy conversational path only.
    async fn fetch_tolerant(&self, sql: &str) -> Vec<Row>;
}

/// Connect a pool sized from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config.effective_url();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&url)
        .await
        .with_context(|| "Failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// [`SqlExecutor`] over a `PgPool`.
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn fetch_strict(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlParam::Text(v) => query.bind(v.clone()),
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Float(v) => query.bind(*v),
                SqlParam::Date(v) => query.bind(*v),
            };
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .with_context(|| "Database query failed")?;

        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn fetch_tolerant(&self, sql: &str) -> Vec<Row> {
        tracing::info!(%sql, "executing generated SQL");
        match sqlx::query(sql).fetch_all(&self.pool).await {
            Ok(rows) => {
                tracing::info!(count = rows.len(), "generated SQL returned rows");
                rows.iter().map(row_to_map).collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "generated SQL failed, returning empty result set");
                Vec::new()
            }
        }
    }
}

/// Decode a Postgres row into an ordered field→JSON mapping.
///
/// Unknown or undecodable column types degrade to `null` rather than
/// failing the whole row; model-generated SELECTs can reference anything.
fn row_to_map(row: &PgRow) -> Row {
    let mut map = Map::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = decode_column(row, column.ordinal(), column.type_info().name());
        map.insert(name, value);
    }
    map
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::String),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map_or(Value::Null, Value::Number),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::Bool),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .ok()
            .flatten()
            .map_or(Value::Null, |d| {
                Value::String(d.format("%Y-%m-%d").to_string())
            }),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .ok()
            .flatten()
            .map_or(Value::Null, |t| Value::String(t.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .ok()
            .flatten()
            .map_or(Value::Null, |t| Value::String(t.to_rfc3339())),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        other => {
            // NUMERIC and friends: last-resort text cast, else null.
            if let Ok(Some(text)) = row.try_get::<Option<String>, _>(idx) {
                Value::String(text)
            } else {
                tracing::debug!(type_name = other, "undecodable column type, emitting null");
                Value::Null
            }
        }
    }
}
