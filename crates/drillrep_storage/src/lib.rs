//! # drillrep storage
//!
//! Storage backend resolution with retry and failover.
//!
//! A [`StorageResolver`] takes an ordered list of candidate backends and
//! keeps exactly one live connection to the first candidate that answers:
//!
//! - direct PostgreSQL (`postgres` feature)
//! - a hosted REST gateway such as Supabase (`rest` feature)
//! - an embedded SQLite file (`sqlite` feature, default)
//!
//! Transient failures are retried with exponential backoff before moving on.
//! Structural failures (bad credentials, missing database) skip the
//! candidate at once. Once connected, failed health checks degrade the
//! connection and, past a threshold, fail over to the next candidate.
//!
//! ## Key Invariants
//!
//! - At most one active connection at any time.
//! - Candidates are tried strictly in priority order.
//! - Retries for one candidate never exceed its configured attempts.
//! - Exhaustion reports every attempted candidate with its last error.
//!
//! ## Example
//!
//! ```rust,no_run
//! use drillrep_storage::{QuerySpec, ResolverConfig, StorageResolver};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResolverConfig::from_env()?;
//! let resolver = StorageResolver::with_defaults(config)?;
//! resolver.connect().await?;
//! let users = resolver.execute(&QuerySpec::sql("SELECT * FROM users")).await?;
//! println!("{} users", users.rows.len());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
pub mod backends;
mod cancel;
mod config;
mod descriptor;
mod error;
mod query;
mod resolver;

pub use backend::{BackendConnector, BackendSession, ConnectorRegistry};
pub use cancel::CancelToken;
pub use config::{ResolverConfig, RetryConfig, DEFAULT_SQLITE_PATH};
pub use descriptor::{BackendDescriptor, BackendKind};
pub use error::{
    BackendError, BackendResult, CandidateFailure, ConfigError, ConfigResult, ConnectivityError,
    ResolverError, ResolverResult,
};
pub use query::{QueryOutput, QuerySpec, RestMethod, Row};
pub use resolver::{ConnectionInfo, Health, ResolverState, ResolverStats, StorageResolver};
