//! CLI command implementations.

pub mod hash;
pub mod login;
pub mod probe;
pub mod query;
pub mod report;
pub mod verify;

use clap::ValueEnum;
use drillrep_auth::AuthError;
use drillrep_storage::{
    ConfigError, ConnectivityError, ResolverConfig, ResolverError, StorageResolver,
};
use std::path::Path;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Configuration could not be loaded.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// No backend could be reached.
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    /// A query failed.
    #[error(transparent)]
    Resolver(#[from] ResolverError),

    /// Credential generation failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output could not be produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid combination of arguments.
    #[error("{0}")]
    Usage(String),
}

/// How a command prints its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// One JSON document.
    Json,
}

/// Result type for CLI commands.
pub type CommandResult<T> = Result<T, CommandError>;

/// Loads the resolver configuration from `path`, or from the environment.
pub fn load_config(path: Option<&Path>) -> CommandResult<ResolverConfig> {
    let config = match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading resolver configuration");
            ResolverConfig::from_toml_file(path)?
        }
        None => ResolverConfig::from_env()?,
    };
    Ok(config)
}

/// Builds a resolver with every compiled-in backend and connects it.
pub async fn connect(path: Option<&Path>) -> CommandResult<StorageResolver> {
    let resolver = StorageResolver::with_defaults(load_config(path)?)?;
    let info = resolver.connect().await?;
    tracing::info!(
        candidate = info.index,
        backend = %info.descriptor,
        "storage ready"
    );
    Ok(resolver)
}
