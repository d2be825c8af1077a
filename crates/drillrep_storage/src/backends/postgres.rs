//! Direct PostgreSQL backend over a sqlx pool.

use crate::backend::{BackendConnector, BackendSession};
use crate::descriptor::{BackendDescriptor, BackendKind};
use crate::error::{BackendError, BackendResult};
use crate::query::{QueryOutput, QuerySpec, Row};
use super::missing_table;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Either, Postgres, Row as _, TypeInfo};
use std::time::Duration;

/// Connector for [`BackendKind::DirectSql`].
///
/// Accepts `postgres://` and `postgresql://` URLs. TLS is required unless
/// the URL sets its own `sslmode`.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PostgresConnector {
    /// Creates a connector with a pool of 5 connections.
    pub fn new() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the pool size.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Sets how long to wait for a pooled connection.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendConnector for PostgresConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::DirectSql
    }

    async fn connect(
        &self,
        descriptor: &BackendDescriptor,
    ) -> BackendResult<Box<dyn BackendSession>> {
        let url = normalize_url(&descriptor.connection_spec)?;

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&url)
            .await
            .map_err(|e| classify(&e, true))?;

        tracing::debug!(backend = %descriptor, "postgres pool created");
        Ok(Box::new(PostgresSession { pool }))
    }
}

/// Rewrites `postgres://` to `postgresql://` and adds `sslmode=require`.
pub(crate) fn normalize_url(spec: &str) -> BackendResult<String> {
    let spec = spec.trim();
    let url = if let Some(rest) = spec.strip_prefix("postgres://") {
        format!("postgresql://{rest}")
    } else if spec.starts_with("postgresql://") {
        spec.to_string()
    } else {
        return Err(BackendError::structural(
            "connection spec must be a postgres:// or postgresql:// URL",
        ));
    };

    if url.contains("sslmode=") {
        return Ok(url);
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    Ok(format!("{url}{separator}sslmode=require"))
}

struct PostgresSession {
    pool: PgPool,
}

#[async_trait]
impl BackendSession for PostgresSession {
    async fn probe(&self) -> BackendResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e, true))
    }

    async fn verify_tables(&self, tables: &[String]) -> BackendResult<()> {
        for table in tables {
            let found: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1)",
            )
            .bind(table.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(&e, true))?;
            if !found {
                return Err(missing_table(table));
            }
        }
        Ok(())
    }

    async fn execute(&self, query: &QuerySpec) -> BackendResult<QueryOutput> {
        let QuerySpec::Sql { statement, params } = query else {
            return Err(BackendError::query(
                "direct SQL backend cannot run REST queries",
            ));
        };

        let bound = params
            .iter()
            .fold(sqlx::query(statement), |q, param| bind_json(q, param));

        let mut stream = bound.fetch_many(&self.pool);
        let mut rows = Vec::new();
        let mut rows_affected = 0;

        while let Some(item) = stream.try_next().await.map_err(|e| classify(&e, false))? {
            match item {
                Either::Left(done) => rows_affected += done.rows_affected(),
                Either::Right(row) => rows.push(decode_row(&row)?),
            }
        }

        if rows.is_empty() {
            return Ok(QueryOutput::affected(rows_affected));
        }
        Ok(QueryOutput::from_rows(rows))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(sqlx::types::Json(other.clone())),
    }
}

fn decode_row(row: &PgRow) -> BackendResult<Row> {
    let mut record = Row::new();
    for column in row.columns() {
        let i = column.ordinal();
        let value = match column.type_info().name() {
            "BOOL" => get::<bool>(row, i)?.map(Value::from),
            "INT2" => get::<i16>(row, i)?.map(Value::from),
            "INT4" => get::<i32>(row, i)?.map(Value::from),
            "INT8" => get::<i64>(row, i)?.map(Value::from),
            "FLOAT4" => get::<f32>(row, i)?.map(Value::from),
            "FLOAT8" => get::<f64>(row, i)?.map(Value::from),
            "JSON" | "JSONB" => get::<Value>(row, i)?,
            "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, i)?.map(|t| Value::from(t.to_rfc3339())),
            "TIMESTAMP" => get::<NaiveDateTime>(row, i)?.map(|t| Value::from(t.to_string())),
            "DATE" => get::<NaiveDate>(row, i)?.map(|d| Value::from(d.to_string())),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => get::<String>(row, i)?.map(Value::from),
            other => {
                tracing::trace!(column = column.name(), ty = other, "unsupported column type");
                None
            }
        };
        record.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(record)
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> BackendResult<Option<T>>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index)
        .map_err(|e| BackendError::query(format!("column {index}: {e}")))
}

/// Maps a sqlx error onto the backend taxonomy by SQLSTATE class.
fn classify(err: &sqlx::Error, connecting: bool) -> BackendError {
    let message = err.to_string();
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            match code.as_str() {
                // invalid_password, invalid_authorization_specification,
                // invalid_catalog_name
                "28P01" | "28000" | "3D000" => BackendError::Structural(message),
                c if c.starts_with("08") || c.starts_with("53") || c.starts_with("57P") => {
                    BackendError::Transient(message)
                }
                _ if connecting => BackendError::Structural(message),
                _ => BackendError::Query(message),
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Protocol(_) => BackendError::Transient(message),
        sqlx::Error::Configuration(_) | sqlx::Error::Tls(_) => BackendError::Structural(message),
        _ if connecting => BackendError::Structural(message),
        _ => BackendError::Query(message),
    }
}
