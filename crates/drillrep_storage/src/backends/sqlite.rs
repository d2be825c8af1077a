//! Embedded SQLite file backend.
//!
//! rusqlite is blocking, so every call runs on the blocking thread pool and
//! the connection sits behind a mutex.

use crate::backend::{BackendConnector, BackendSession};
use crate::config::strip_sqlite_scheme;
use crate::descriptor::{BackendDescriptor, BackendKind};
use crate::error::{BackendError, BackendResult};
use crate::query::{QueryOutput, QuerySpec, Row};
use super::missing_table;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, OpenFlags};
use serde_json::{Number, Value};
use std::sync::Arc;
use std::time::Duration;

const IN_MEMORY: &str = ":memory:";

/// Connector for [`BackendKind::EmbeddedFile`].
///
/// The connection spec is a file path, optionally prefixed with `sqlite:///`.
/// A missing file is created.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    busy_timeout: Duration,
}

impl SqliteConnector {
    /// Creates a connector with a 5 second busy timeout.
    pub fn new() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Sets how long SQLite waits on a locked database before failing.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Default for SqliteConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendConnector for SqliteConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::EmbeddedFile
    }

    async fn connect(
        &self,
        descriptor: &BackendDescriptor,
    ) -> BackendResult<Box<dyn BackendSession>> {
        let path = strip_sqlite_scheme(&descriptor.connection_spec).to_string();
        if path.is_empty() {
            return Err(BackendError::structural("empty sqlite path"));
        }
        let busy_timeout = self.busy_timeout;

        let connection = blocking(move || open_connection(&path, busy_timeout)).await?;
        tracing::debug!(backend = %descriptor, "sqlite file opened");

        Ok(Box::new(SqliteSession {
            connection: Arc::new(Mutex::new(Some(connection))),
        }))
    }
}

fn open_connection(path: &str, busy_timeout: Duration) -> BackendResult<Connection> {
    let connection = if path == IN_MEMORY {
        Connection::open_in_memory()
    } else {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Connection::open_with_flags(path, flags)
    }
    .map_err(|e| classify(&e, true))?;

    connection
        .busy_timeout(busy_timeout)
        .map_err(|e| classify(&e, true))?;
    Ok(connection)
}

async fn blocking<T, F>(work: F) -> BackendResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> BackendResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BackendError::transient(format!("sqlite worker failed: {e}")))?
}

struct SqliteSession {
    connection: Arc<Mutex<Option<Connection>>>,
}

impl SqliteSession {
    async fn with_connection<T, F>(&self, work: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> BackendResult<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        blocking(move || {
            let guard = connection.lock();
            let connection = guard
                .as_ref()
                .ok_or_else(|| BackendError::transient("sqlite session closed"))?;
            work(connection)
        })
        .await
    }
}

#[async_trait]
impl BackendSession for SqliteSession {
    async fn probe(&self) -> BackendResult<()> {
        // Touching the schema fails on files that are not databases.
        self.with_connection(|conn| {
            conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|_| ())
            .map_err(|e| classify(&e, true))
        })
        .await
    }

    async fn verify_tables(&self, tables: &[String]) -> BackendResult<()> {
        let tables = tables.to_vec();
        self.with_connection(move |conn| {
            let mut lookup = conn
                .prepare_cached(
                    "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
                )
                .map_err(|e| classify(&e, true))?;
            for table in &tables {
                if !lookup.exists([table]).map_err(|e| classify(&e, true))? {
                    return Err(missing_table(table));
                }
            }
            Ok(())
        })
        .await
    }

    async fn execute(&self, query: &QuerySpec) -> BackendResult<QueryOutput> {
        let (statement, params) = match query {
            QuerySpec::Sql { statement, params } => (statement.clone(), params.clone()),
            QuerySpec::Rest { .. } => {
                return Err(BackendError::query(
                    "embedded file backend cannot run REST queries",
                ))
            }
        };
        self.with_connection(move |conn| run_statement(conn, &statement, &params))
            .await
    }

    async fn close(&self) {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            if let Err((_, e)) = connection.close() {
                tracing::debug!(error = %e, "sqlite close reported an error");
            }
        }
    }
}

fn run_statement(conn: &Connection, statement: &str, params: &[Value]) -> BackendResult<QueryOutput> {
    let mut stmt = conn.prepare(statement).map_err(|e| classify(&e, false))?;
    let bound = rusqlite::params_from_iter(params.iter().map(to_sql_value));

    if stmt.column_count() == 0 {
        let affected = stmt.execute(bound).map_err(|e| classify(&e, false))?;
        return Ok(QueryOutput::affected(affected as u64));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(bound).map_err(|e| classify(&e, false))?;
    let mut out = Vec::new();

    while let Some(row) = rows.next().map_err(|e| classify(&e, false))? {
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let value = row.get_ref(i).map_err(|e| classify(&e, false))?;
            record.insert(name.clone(), from_sql_value(value));
        }
        out.push(record);
    }

    Ok(QueryOutput::from_rows(out))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Maps a rusqlite error onto the backend taxonomy.
///
/// Busy and locked files are transient. Unopenable or foreign files are
/// structural. Anything else is a query error on a live connection, or
/// structural while connecting.
fn classify(err: &rusqlite::Error, connecting: bool) -> BackendError {
    let message = err.to_string();
    if let rusqlite::Error::SqliteFailure(failure, _) = err {
        match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure => {
                return BackendError::Transient(message)
            }
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::PermissionDenied
            | ErrorCode::DatabaseCorrupt => return BackendError::Structural(message),
            _ => {}
        }
    }
    if connecting {
        BackendError::Structural(message)
    } else {
        BackendError::Query(message)
    }
}
