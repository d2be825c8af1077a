//! Probe command implementation.

use super::{load_config, CommandResult, OutputFormat};
use drillrep_storage::{
    CandidateFailure, ConnectionInfo, ConnectivityError, ResolverStats, StorageResolver,
};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::Path;
use std::process::ExitCode;

/// Runs the probe command. Exits 1 if no candidate is reachable.
pub async fn run(config: Option<&Path>, format: OutputFormat) -> CommandResult<ExitCode> {
    let config = load_config(config)?;
    let resolver = StorageResolver::with_defaults(config)?;

    let candidates = resolver.candidates().len();
    tracing::info!(candidates, "resolving storage backend");
    let outcome = resolver.connect().await;
    let stats = resolver.stats();

    print!("{}", render(format, candidates, &outcome, &stats)?);

    resolver.shutdown().await;
    Ok(if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Everything the command writes to stdout.
fn render(
    format: OutputFormat,
    candidates: usize,
    outcome: &Result<ConnectionInfo, ConnectivityError>,
    stats: &ResolverStats,
) -> CommandResult<String> {
    match format {
        OutputFormat::Json => {
            let mut report = match outcome {
                Ok(info) => connected_report(info),
                Err(e) => failed_report(e),
            };
            report["attempts"] = json!(stats.attempts);
            report["retries"] = json!(stats.retries);
            Ok(serde_json::to_string_pretty(&report)? + "\n")
        }
        OutputFormat::Text => Ok(render_text(candidates, outcome)),
    }
}

fn failure_json(failure: &CandidateFailure) -> Value {
    json!({
        "index": failure.index,
        "kind": failure.descriptor.kind.as_str(),
        "spec": failure.descriptor.redacted_spec(),
        "attempts": failure.attempts,
        "structural": failure.is_structural(),
        "error": failure.error.to_string(),
    })
}

fn connected_report(info: &ConnectionInfo) -> Value {
    json!({
        "connected": true,
        "active": {
            "index": info.index,
            "kind": info.descriptor.kind.as_str(),
            "spec": info.descriptor.redacted_spec(),
            "established_at": info.established_at.to_rfc3339(),
        },
        "skipped": info.skipped.iter().map(failure_json).collect::<Vec<_>>(),
    })
}

fn failed_report(error: &ConnectivityError) -> Value {
    json!({
        "connected": false,
        "error": error.to_string(),
        "failures": error.failures().iter().map(failure_json).collect::<Vec<_>>(),
    })
}

fn render_text(candidates: usize, outcome: &Result<ConnectionInfo, ConnectivityError>) -> String {
    let mut out = format!("Probing {candidates} candidate(s)\n");
    let failures = match outcome {
        Ok(info) => &info.skipped,
        Err(e) => e.failures(),
    };
    for failure in failures {
        let marker = if failure.is_structural() { "skipped" } else { "gave up" };
        let _ = writeln!(out, "  ✗ {failure} [{marker}]");
    }

    let _ = match outcome {
        Ok(info) => writeln!(out, "  ✓ #{} {} connected", info.index, info.descriptor),
        Err(e) => writeln!(out, "✗ {e}"),
    };
    out
}
