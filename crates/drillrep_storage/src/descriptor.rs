//! Backend candidate descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of storage a candidate points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// A SQL server reached directly (Postgres).
    DirectSql,
    /// A REST gateway in front of a hosted database (PostgREST / Supabase).
    RestGateway,
    /// A file-based embedded database (SQLite).
    EmbeddedFile,
}

impl BackendKind {
    /// Lowercase name as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::DirectSql => "direct_sql",
            BackendKind::RestGateway => "rest_gateway",
            BackendKind::EmbeddedFile => "embedded_file",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured storage option the resolver may activate.
///
/// Descriptors are created once from configuration and never mutated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Backend kind, selects the connection strategy.
    pub kind: BackendKind,
    /// Kind-specific connection string (URL or file path).
    pub connection_spec: String,
    /// Lower values are tried first.
    #[serde(default)]
    pub priority: i32,
}

impl BackendDescriptor {
    /// Creates a new descriptor.
    pub fn new(kind: BackendKind, connection_spec: impl Into<String>, priority: i32) -> Self {
        Self {
            kind,
            connection_spec: connection_spec.into(),
            priority,
        }
    }

    /// Connection spec with any password or API key masked, for logs.
    pub fn redacted_spec(&self) -> String {
        redact(&self.connection_spec)
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("kind", &self.kind)
            .field("connection_spec", &self.redacted_spec())
            .field("priority", &self.priority)
            .finish()
    }
}

impl fmt::Display for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.redacted_spec())
    }
}

/// Masks `user:password@` credentials and `apikey=` query values.
fn redact(spec: &str) -> String {
    let mut out = spec.to_string();

    if let Some(scheme_end) = out.find("://") {
        let rest_start = scheme_end + 3;
        let authority_end = out[rest_start..]
            .find(['/', '?'])
            .map_or(out.len(), |i| rest_start + i);
        if let Some(at) = out[rest_start..authority_end].rfind('@') {
            let userinfo = &out[rest_start..rest_start + at];
            if let Some(colon) = userinfo.find(':') {
                let start = rest_start + colon + 1;
                out.replace_range(start..rest_start + at, "***");
            }
        }
    }

    if let Some(pos) = out.find("apikey=") {
        let start = pos + "apikey=".len();
        let end = out[start..].find('&').map_or(out.len(), |i| start + i);
        out.replace_range(start..end, "***");
    }

    out
}
