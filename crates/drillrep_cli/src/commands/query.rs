//! Query command implementation.

use super::{connect, CommandError, CommandResult};
use drillrep_storage::QuerySpec;
use serde_json::Value;
use std::path::Path;
use std::process::ExitCode;

/// Builds the query from command-line arguments.
pub fn build(
    sql: Option<String>,
    params: Vec<String>,
    rest: Option<String>,
    filter: Option<String>,
) -> CommandResult<QuerySpec> {
    match (sql, rest) {
        (Some(statement), None) => Ok(QuerySpec::sql_with(
            statement,
            params.iter().map(|p| parse_param(p)).collect(),
        )),
        (None, Some(resource)) if params.is_empty() => Ok(QuerySpec::rest_get(resource, filter)),
        (None, Some(_)) => Err(CommandError::Usage(
            "--param only applies to --sql queries".into(),
        )),
        _ => Err(CommandError::Usage(
            "exactly one of --sql or --rest is required".into(),
        )),
    }
}

/// Parses a parameter as JSON, falling back to a plain string.
fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Runs the query command, printing rows as JSON lines.
pub async fn run(config: Option<&Path>, query: &QuerySpec) -> CommandResult<ExitCode> {
    let resolver = connect(config).await?;
    let result = resolver.execute(query).await;
    resolver.shutdown().await;

    let output = result?;
    for row in &output.rows {
        println!("{}", serde_json::to_string(row)?);
    }
    if output.rows.is_empty() {
        println!("{} row(s) affected", output.rows_affected);
    }
    Ok(ExitCode::SUCCESS)
}
