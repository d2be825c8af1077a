//! Error types for backend resolution.

use crate::descriptor::BackendDescriptor;
use crate::resolver::ResolverState;
use std::fmt;
use thiserror::Error;

/// Result type for a single backend strategy call.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type for resolver operations.
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// An error reported by one backend strategy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network-level failure that may clear up (timeout, refused, busy).
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Configuration, credential or schema mismatch. Retrying cannot help.
    #[error("structural backend error: {0}")]
    Structural(String),

    /// The query itself failed on a healthy connection.
    #[error("query error: {0}")]
    Query(String),
}

impl BackendError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a structural error.
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Returns true if the same candidate may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    /// Returns true for configuration, credential or schema failures.
    pub fn is_structural(&self) -> bool {
        matches!(self, BackendError::Structural(_))
    }

    /// Returns true if the error says something about the connection rather
    /// than the query.
    pub fn is_connection_level(&self) -> bool {
        !matches!(self, BackendError::Query(_))
    }
}

/// Why one candidate was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    /// Position of the candidate in priority order.
    pub index: usize,
    /// The abandoned candidate.
    pub descriptor: BackendDescriptor,
    /// Connect attempts made against it.
    pub attempts: u32,
    /// The last error it reported.
    pub error: BackendError,
}

impl CandidateFailure {
    /// Returns true if the candidate was skipped after a structural error.
    pub fn is_structural(&self) -> bool {
        self.error.is_structural()
    }
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} after {} attempt(s): {}",
            self.index, self.descriptor, self.attempts, self.error
        )
    }
}

/// Failure to establish any connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    /// No candidates are configured.
    #[error("no backend candidates configured")]
    NoCandidates,

    /// Every attempted candidate failed.
    #[error("all backend candidates failed: {}", format_failures(.failures))]
    Exhausted {
        /// One entry per attempted candidate, in priority order.
        failures: Vec<CandidateFailure>,
    },

    /// The caller cancelled the connect sequence.
    #[error("connect cancelled")]
    Cancelled,
}

impl ConnectivityError {
    /// The per-candidate failures, empty unless exhausted.
    pub fn failures(&self) -> &[CandidateFailure] {
        match self {
            ConnectivityError::Exhausted { failures } => failures,
            _ => &[],
        }
    }
}

fn format_failures(failures: &[CandidateFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by [`StorageResolver`](crate::StorageResolver) calls.
#[derive(Error, Debug, Clone)]
pub enum ResolverError {
    /// `execute` was called while no connection is usable.
    #[error("not connected (state: {state})")]
    NotConnected {
        /// State at the time of the call.
        state: ResolverState,
    },

    /// Connecting failed.
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    /// The query failed; the connection is fine.
    #[error("query failed: {0}")]
    Query(String),

    /// The connection failed while running the query.
    #[error("backend failed during query: {0}")]
    Backend(BackendError),
}

impl ResolverError {
    /// Returns true if the failure is about reaching storage rather than
    /// about the query.
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, ResolverError::Query(_))
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or missing.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
