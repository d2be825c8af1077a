//! Login command implementation.
//!
//! Fetches the user record from whichever backend the resolver settled on,
//! then checks the password and the role the user must hold.

use super::{connect, CommandError, CommandResult};
use clap::ValueEnum;
use drillrep_auth::{needs_rehash, CredentialVerifier};
use drillrep_storage::{BackendKind, QuerySpec, Row, StorageResolver};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::process::ExitCode;

/// Roles a user can log in as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Files drilling reports.
    Worker,
    /// Reviews reports.
    Dispatcher,
}

impl Role {
    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "worker" => Some(Role::Worker),
            "dispatcher" => Some(Role::Dispatcher),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Worker => write!(f, "worker"),
            Role::Dispatcher => write!(f, "dispatcher"),
        }
    }
}

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Password and role match.
    Granted,
    /// Unknown user, wrong password or wrong role.
    Rejected,
    /// The user store could not be queried.
    Unavailable(String),
}

/// Runs the login command.
///
/// Exits 0 when granted, 1 when rejected and 2 when storage is unavailable.
pub async fn run(
    config: Option<&Path>,
    username: &str,
    password: &str,
    role: Role,
) -> CommandResult<ExitCode> {
    let outcome = match connect(config).await {
        Ok(resolver) => {
            let verifier = CredentialVerifier::default();
            let outcome = authenticate(&resolver, &verifier, username, password, role).await;
            resolver.shutdown().await;
            outcome
        }
        Err(CommandError::Connectivity(e)) => LoginOutcome::Unavailable(e.to_string()),
        Err(e) => return Err(e),
    };

    let code = match outcome {
        LoginOutcome::Granted => {
            println!("✓ {username} logged in as {role}");
            0
        }
        LoginOutcome::Rejected => {
            println!("✗ invalid username or password");
            1
        }
        LoginOutcome::Unavailable(reason) => {
            tracing::error!(reason = %reason, "user store unavailable");
            println!("✗ user store unavailable");
            2
        }
    };
    Ok(ExitCode::from(code))
}

/// Looks up `username` and checks `password` and `role`.
pub async fn authenticate(
    resolver: &StorageResolver,
    verifier: &CredentialVerifier,
    username: &str,
    password: &str,
    role: Role,
) -> LoginOutcome {
    let Some(active) = resolver.active().await else {
        return LoginOutcome::Unavailable("not connected".into());
    };

    let query = lookup_query(active.descriptor.kind, username);
    let output = match resolver.execute(&query).await {
        Ok(output) => output,
        Err(e) => return LoginOutcome::Unavailable(e.to_string()),
    };

    let Some(row) = output.first() else {
        tracing::debug!(username, "unknown user");
        return LoginOutcome::Rejected;
    };

    let stored = stored_credential(row);
    // Always verify, so a wrong role costs as much as a wrong password.
    let password_ok = verifier.matches_opt(Some(password), stored);
    let role_ok = row_role(row) == Some(role);

    if password_ok && stored.is_some_and(needs_rehash) {
        tracing::info!(username, "credential uses a legacy scheme, rehash recommended");
    }

    if password_ok && role_ok {
        LoginOutcome::Granted
    } else {
        tracing::debug!(username, password_ok, role_ok, "login rejected");
        LoginOutcome::Rejected
    }
}

/// Builds the user lookup for a backend kind.
pub fn lookup_query(kind: BackendKind, username: &str) -> QuerySpec {
    let param = vec![Value::from(username)];
    match kind {
        BackendKind::DirectSql => {
            QuerySpec::sql_with("SELECT * FROM users WHERE username = $1 LIMIT 1", param)
        }
        BackendKind::EmbeddedFile => {
            QuerySpec::sql_with("SELECT * FROM users WHERE username = ?1 LIMIT 1", param)
        }
        BackendKind::RestGateway => QuerySpec::rest_get(
            "users",
            Some(format!(
                "select=*&username=eq.{}&limit=1",
                percent_encode(username)
            )),
        ),
    }
}

/// Stored credential column; older schemas call it `hashed_password`.
fn stored_credential(row: &Row) -> Option<&str> {
    row.get("password_hash")
        .or_else(|| row.get("hashed_password"))
        .and_then(Value::as_str)
}

/// Role column, or the older boolean `is_dispatcher` flag.
fn row_role(row: &Row) -> Option<Role> {
    if let Some(role) = row.get("role").and_then(Value::as_str) {
        return Role::parse(role);
    }
    match row.get("is_dispatcher")? {
        Value::Bool(true) => Some(Role::Dispatcher),
        Value::Bool(false) => Some(Role::Worker),
        Value::Number(n) => Some(if n.as_i64() == Some(0) {
            Role::Worker
        } else {
            Role::Dispatcher
        }),
        _ => None,
    }
}

fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
