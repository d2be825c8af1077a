//! Backend strategies, one per [`BackendKind`](crate::BackendKind).
//!
//! Native clients are behind cargo features: `postgres`, `rest` and
//! `sqlite`. The scripted backend is always available.

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "rest")]
mod rest;
mod scripted;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresConnector;
#[cfg(feature = "rest")]
pub use rest::RestConnector;
pub use scripted::{ScriptStep, ScriptedBackend, ScriptedConnector, ScriptedWorld};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnector;

use crate::error::BackendError;

pub(crate) fn missing_table(table: &str) -> BackendError {
    BackendError::structural(format!("missing table: {table}"))
}
