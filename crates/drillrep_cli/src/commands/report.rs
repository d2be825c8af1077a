//! Report commands: file a drilling report, list filed reports.

use super::{connect, CommandResult, OutputFormat};
use clap::{Args, Subcommand};
use drillrep_storage::{BackendKind, QuerySpec, ResolverError, Row, StorageResolver};
use serde_json::Value;
use std::path::Path;
use std::process::ExitCode;

const REPORTS: &str = "reports";

/// Report subcommands.
#[derive(Debug, Subcommand)]
pub enum ReportAction {
    /// File a new drilling report
    Submit(ReportDraft),

    /// List filed reports, newest first
    List {
        /// Maximum number of reports to show
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// A report as entered by the operator.
#[derive(Debug, Clone, Default, PartialEq, Args)]
pub struct ReportDraft {
    /// Drilling site
    #[arg(long)]
    pub location: String,

    /// Rig number
    #[arg(long)]
    pub rig_number: String,

    /// Metres drilled
    #[arg(long)]
    pub meterage: Option<f64>,

    /// Running metres
    #[arg(long)]
    pub pogon: Option<f64>,

    /// Operation performed
    #[arg(long)]
    pub operation: Option<String>,

    /// Free-form note
    #[arg(long)]
    pub note: Option<String>,

    /// Who filed the report
    #[arg(long)]
    pub operator_name: String,
}

impl ReportDraft {
    /// Column values in insert order; unset optional fields are left to
    /// the table defaults.
    fn columns(&self) -> Vec<(&'static str, Value)> {
        let optional = [
            ("meterage", self.meterage.map(Value::from)),
            ("pogon", self.pogon.map(Value::from)),
            ("operation", self.operation.clone().map(Value::from)),
            ("note", self.note.clone().map(Value::from)),
        ];
        let mut columns = vec![
            ("location", Value::from(self.location.as_str())),
            ("rig_number", Value::from(self.rig_number.as_str())),
        ];
        columns.extend(
            optional
                .into_iter()
                .filter_map(|(name, value)| Some((name, value?))),
        );
        columns.push(("operator_name", Value::from(self.operator_name.as_str())));
        columns
    }
}

/// Runs a report subcommand.
pub async fn run(config: Option<&Path>, action: ReportAction) -> CommandResult<ExitCode> {
    let resolver = connect(config).await?;
    let result = match &action {
        ReportAction::Submit(draft) => submit(&resolver, draft).await.map(|affected| {
            format!("✓ report filed for rig {} ({affected} row(s))\n", draft.rig_number)
        }),
        ReportAction::List { limit, format } => list(&resolver, *limit)
            .await
            .and_then(|rows| render(*format, &rows)),
    };
    resolver.shutdown().await;

    print!("{}", result?);
    Ok(ExitCode::SUCCESS)
}

/// Inserts `draft` into the reports table of the active backend.
///
/// Returns the number of rows written.
pub async fn submit(resolver: &StorageResolver, draft: &ReportDraft) -> CommandResult<u64> {
    let kind = active_kind(resolver).await?;
    let output = resolver.execute(&insert_query(kind, draft)).await?;
    tracing::info!(backend = %kind, rig = %draft.rig_number, "report filed");
    Ok(output.rows_affected)
}

/// Fetches up to `limit` reports, newest first.
pub async fn list(resolver: &StorageResolver, limit: u32) -> CommandResult<Vec<Row>> {
    let kind = active_kind(resolver).await?;
    Ok(resolver.execute(&list_query(kind, limit)).await?.rows)
}

async fn active_kind(resolver: &StorageResolver) -> CommandResult<BackendKind> {
    match resolver.active().await {
        Some(info) => Ok(info.descriptor.kind),
        None => Err(ResolverError::NotConnected {
            state: resolver.state().await,
        }
        .into()),
    }
}

/// Builds the report insert for a backend kind.
pub fn insert_query(kind: BackendKind, draft: &ReportDraft) -> QuerySpec {
    let columns = draft.columns();
    let placeholder = |n: usize| match kind {
        BackendKind::DirectSql => format!("${n}"),
        _ => format!("?{n}"),
    };

    match kind {
        BackendKind::RestGateway => {
            let body: Row = columns
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect();
            QuerySpec::rest_insert(REPORTS, Value::Object(body))
        }
        BackendKind::DirectSql | BackendKind::EmbeddedFile => {
            let names: Vec<_> = columns.iter().map(|(name, _)| *name).collect();
            let slots: Vec<_> = (1..=columns.len()).map(placeholder).collect();
            QuerySpec::sql_with(
                format!(
                    "INSERT INTO {REPORTS} ({}) VALUES ({})",
                    names.join(", "),
                    slots.join(", ")
                ),
                columns.into_iter().map(|(_, value)| value).collect(),
            )
        }
    }
}

/// Builds the newest-first report listing for a backend kind.
pub fn list_query(kind: BackendKind, limit: u32) -> QuerySpec {
    match kind {
        BackendKind::RestGateway => QuerySpec::rest_get(
            REPORTS,
            Some(format!("select=*&order=id.desc&limit={limit}")),
        ),
        BackendKind::DirectSql | BackendKind::EmbeddedFile => {
            QuerySpec::sql(format!("SELECT * FROM {REPORTS} ORDER BY id DESC LIMIT {limit}"))
        }
    }
}

fn render(format: OutputFormat, rows: &[Row]) -> CommandResult<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(rows)? + "\n"),
        OutputFormat::Text if rows.is_empty() => Ok("no reports\n".to_string()),
        OutputFormat::Text => Ok(rows.iter().map(|row| render_row(row) + "\n").collect()),
    }
}

fn render_row(row: &Row) -> String {
    let field = |key: &str| match row.get(key) {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    format!(
        "#{} {} rig {} at {}: {} m, pogon {} ({}) {}",
        field("id"),
        field("created_at"),
        field("rig_number"),
        field("location"),
        field("meterage"),
        field("pogon"),
        field("operator_name"),
        field("note"),
    )
}
