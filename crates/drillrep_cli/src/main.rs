//! drillrep CLI
//!
//! Command-line tools for credential checks and storage failover.
//!
//! # Commands
//!
//! - `hash` - Produce a stored credential for a password
//! - `classify` - Show which scheme a stored credential uses
//! - `verify` - Check a password against a stored credential
//! - `probe` - Resolve a storage backend and report each candidate
//! - `query` - Run a query against the resolved backend
//! - `login` - Look up a user and check password and role
//! - `report` - File a drilling report or list filed reports

mod commands;

use clap::{Parser, Subcommand};
use commands::hash::HashScheme;
use commands::login::Role;
use commands::report::ReportAction;
use commands::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// drillrep credential and storage tools.
#[derive(Parser)]
#[command(name = "drillrep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Resolver configuration file (TOML); the environment is used if absent
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce a stored credential for a password
    Hash {
        /// Password to hash; read from stdin if omitted
        password: Option<String>,

        /// Scheme to produce
        #[arg(short, long, value_enum, default_value = "bcrypt")]
        scheme: HashScheme,

        /// bcrypt cost
        #[arg(long)]
        cost: Option<u32>,

        /// PBKDF2 rounds
        #[arg(long)]
        rounds: Option<u32>,
    },

    /// Show which scheme a stored credential uses
    Classify {
        /// The stored credential
        stored: String,
    },

    /// Check a password against a stored credential
    Verify {
        /// Candidate password
        password: String,

        /// The stored credential
        stored: String,

        /// Refuse unhashed stored values
        #[arg(long)]
        no_plaintext: bool,
    },

    /// Resolve a storage backend and report each candidate
    Probe {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a query against the resolved backend
    Query {
        /// SQL statement (direct SQL and embedded file backends)
        #[arg(long, conflicts_with = "rest")]
        sql: Option<String>,

        /// Positional parameter for the SQL statement; parsed as JSON if possible
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// REST resource to select from (REST gateway backend)
        #[arg(long)]
        rest: Option<String>,

        /// PostgREST filter, e.g. `username=eq.bob`
        #[arg(long, requires = "rest")]
        filter: Option<String>,
    },

    /// Look up a user and check password and role
    Login {
        /// Login name
        username: String,

        /// Password
        password: String,

        /// Role the user must hold
        #[arg(short, long, value_enum, default_value = "worker")]
        role: Role,
    },

    /// File or list drilling reports
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();

    let code = match cli.command {
        Commands::Hash {
            password,
            scheme,
            cost,
            rounds,
        } => commands::hash::run(password, scheme, cost, rounds)?,
        Commands::Classify { stored } => commands::verify::classify(&stored),
        Commands::Verify {
            password,
            stored,
            no_plaintext,
        } => commands::verify::run(&password, &stored, !no_plaintext),
        Commands::Probe { format } => commands::probe::run(config, format).await?,
        Commands::Query {
            sql,
            params,
            rest,
            filter,
        } => {
            let query = commands::query::build(sql, params, rest, filter)?;
            commands::query::run(config, &query).await?
        }
        Commands::Login {
            username,
            password,
            role,
        } => commands::login::run(config, &username, &password, role).await?,
        Commands::Report { action } => commands::report::run(config, action).await?,
        Commands::Version => {
            println!("drillrep CLI v{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}
