//! Query payloads and results.
//!
//! A [`QuerySpec`] is forwarded verbatim to whichever backend is active.
//! The resolver never translates between dialects, so a caller that may
//! land on several kinds must pick the payload shape per
//! [`BackendKind`](crate::BackendKind).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One result row, column name to JSON value.
pub type Row = Map<String, Value>;

/// HTTP method for a REST gateway request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RestMethod {
    /// Select rows.
    Get,
    /// Insert rows.
    Post,
    /// Update rows matching the filter.
    Patch,
    /// Delete rows matching the filter.
    Delete,
}

impl fmt::Display for RestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestMethod::Get => "GET",
            RestMethod::Post => "POST",
            RestMethod::Patch => "PATCH",
            RestMethod::Delete => "DELETE",
        })
    }
}

/// A backend-specific query payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuerySpec {
    /// A parameterized SQL statement (`DirectSql`, `EmbeddedFile`).
    ///
    /// Placeholder syntax is the backend's own: `$1` for Postgres,
    /// `?1` or `?` for SQLite.
    Sql {
        /// Statement text.
        statement: String,
        /// Positional parameters.
        params: Vec<Value>,
    },
    /// A PostgREST request (`RestGateway`).
    Rest {
        /// HTTP method.
        method: RestMethod,
        /// Table or view name, e.g. `users`.
        resource: String,
        /// Raw query string, e.g. `username=eq.bob&select=*`.
        filter: Option<String>,
        /// JSON body for inserts and updates.
        body: Option<Value>,
    },
}

impl QuerySpec {
    /// Creates a SQL query without parameters.
    pub fn sql(statement: impl Into<String>) -> Self {
        QuerySpec::Sql {
            statement: statement.into(),
            params: Vec::new(),
        }
    }

    /// Creates a SQL query with positional parameters.
    pub fn sql_with(statement: impl Into<String>, params: Vec<Value>) -> Self {
        QuerySpec::Sql {
            statement: statement.into(),
            params,
        }
    }

    /// Creates a REST select.
    pub fn rest_get(resource: impl Into<String>, filter: Option<String>) -> Self {
        QuerySpec::Rest {
            method: RestMethod::Get,
            resource: resource.into(),
            filter,
            body: None,
        }
    }

    /// Creates a REST insert.
    pub fn rest_insert(resource: impl Into<String>, body: Value) -> Self {
        QuerySpec::Rest {
            method: RestMethod::Post,
            resource: resource.into(),
            filter: None,
            body: Some(body),
        }
    }

    /// Short description for logs, without parameter values.
    pub fn summary(&self) -> String {
        match self {
            QuerySpec::Sql { statement, params } => {
                let first_line = statement.lines().next().unwrap_or_default().trim();
                format!("sql[{} params]: {first_line}", params.len())
            }
            QuerySpec::Rest {
                method, resource, ..
            } => format!("rest: {method} {resource}"),
        }
    }
}

/// Result of an executed query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    /// Returned rows, empty for statements that return none.
    pub rows: Vec<Row>,
    /// Rows changed by the statement, when the backend reports it.
    pub rows_affected: u64,
}

impl QueryOutput {
    /// Creates an output from rows.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows_affected: rows.len() as u64,
            rows,
        }
    }

    /// Creates an output for a statement that returned no rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }

    /// The first row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_hides_params() {
        let q = QuerySpec::sql_with(
            "SELECT * FROM users WHERE username = $1\n  LIMIT 1",
            vec![json!("secret-user")],
        );
        let s = q.summary();
        assert_eq!(s, "sql[1 params]: SELECT * FROM users WHERE username = $1");
        assert!(!s.contains("secret-user"));

        let q = QuerySpec::rest_get("users", Some("username=eq.bob".into()));
        assert_eq!(q.summary(), "rest: GET users");
    }

    #[test]
    fn output_helpers() {
        let mut row = Row::new();
        row.insert("id".into(), json!(1));
        let out = QueryOutput::from_rows(vec![row]);
        assert_eq!(out.rows_affected, 1);
        assert_eq!(out.first().unwrap()["id"], json!(1));
        assert!(QueryOutput::affected(3).first().is_none());
    }
}
