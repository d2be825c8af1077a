//! Hosted REST gateway backend (Supabase / PostgREST).

use crate::backend::{BackendConnector, BackendSession};
use crate::descriptor::{BackendDescriptor, BackendKind};
use crate::error::{BackendError, BackendResult};
use crate::query::{QueryOutput, QuerySpec, RestMethod, Row};
use super::missing_table;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

const REST_PATH: &str = "/rest/v1/";

/// Connector for [`BackendKind::RestGateway`].
///
/// The connection spec is the project URL with the API key as a query
/// parameter: `https://project.supabase.co?apikey=KEY`.
#[derive(Debug, Clone)]
pub struct RestConnector {
    request_timeout: Duration,
}

impl RestConnector {
    /// Creates a connector with a 10 second request timeout.
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for RestConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendConnector for RestConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::RestGateway
    }

    async fn connect(
        &self,
        descriptor: &BackendDescriptor,
    ) -> BackendResult<Box<dyn BackendSession>> {
        let (base_url, api_key) = parse_spec(&descriptor.connection_spec)?;
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| BackendError::structural(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(backend = %descriptor, "rest gateway client created");
        Ok(Box::new(RestSession {
            client,
            base_url,
            api_key,
        }))
    }
}

/// Splits a connection spec into base URL and API key.
pub(crate) fn parse_spec(spec: &str) -> BackendResult<(String, String)> {
    let (base, query) = spec
        .trim()
        .split_once('?')
        .ok_or_else(|| BackendError::structural("rest spec has no apikey parameter"))?;

    if !(base.starts_with("https://") || base.starts_with("http://")) {
        return Err(BackendError::structural("rest spec must be an http(s) URL"));
    }

    let api_key = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("apikey="))
        .filter(|key| !key.is_empty())
        .ok_or_else(|| BackendError::structural("rest spec has no apikey parameter"))?;

    Ok((base.trim_end_matches('/').to_string(), api_key.to_string()))
}

struct RestSession {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestSession {
    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
    }
}

#[async_trait]
impl BackendSession for RestSession {
    async fn probe(&self) -> BackendResult<()> {
        let url = format!("{}{REST_PATH}", self.base_url);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body, true))
    }

    async fn verify_tables(&self, tables: &[String]) -> BackendResult<()> {
        for table in tables {
            let url = format!("{}{REST_PATH}{table}?select=*&limit=0", self.base_url);
            let response = self
                .request(reqwest::Method::GET, &url)
                .send()
                .await
                .map_err(|e| classify_transport(&e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_table_status(table, status, &body));
            }
        }
        Ok(())
    }

    async fn execute(&self, query: &QuerySpec) -> BackendResult<QueryOutput> {
        let QuerySpec::Rest {
            method,
            resource,
            filter,
            body,
        } = query
        else {
            return Err(BackendError::query(
                "rest gateway backend cannot run SQL statements",
            ));
        };

        let mut url = format!("{}{REST_PATH}{}", self.base_url, resource.trim_matches('/'));
        if let Some(filter) = filter.as_deref().filter(|f| !f.is_empty()) {
            url.push('?');
            url.push_str(filter);
        }

        let mut request = self.request(http_method(*method), &url);
        if *method != RestMethod::Get {
            request = request.header("prefer", "return=representation");
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| classify_transport(&e))?;

        if !status.is_success() {
            return Err(classify_status(status, &text, false));
        }
        parse_rows(&text)
    }

    async fn close(&self) {}
}

fn http_method(method: RestMethod) -> reqwest::Method {
    match method {
        RestMethod::Get => reqwest::Method::GET,
        RestMethod::Post => reqwest::Method::POST,
        RestMethod::Patch => reqwest::Method::PATCH,
        RestMethod::Delete => reqwest::Method::DELETE,
    }
}

fn parse_rows(text: &str) -> BackendResult<QueryOutput> {
    if text.trim().is_empty() {
        return Ok(QueryOutput::affected(0));
    }
    let value: Value = serde_json::from_str(text)
        .map_err(|e| BackendError::query(format!("invalid JSON response: {e}")))?;

    let rows: Vec<Row> = match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect(),
        Value::Object(row) => vec![row],
        _ => Vec::new(),
    };
    Ok(QueryOutput::from_rows(rows))
}

fn classify_transport(err: &reqwest::Error) -> BackendError {
    if err.is_builder() {
        BackendError::structural(err.to_string())
    } else {
        BackendError::transient(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str, probing: bool) -> BackendError {
    let message = format!("{status}: {}", body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Structural(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            BackendError::Transient(message)
        }
        s if s.is_server_error() => BackendError::Transient(message),
        _ if probing => BackendError::Structural(message),
        _ => BackendError::Query(message),
    }
}

/// PostgREST answers 404 for a relation it does not expose.
fn classify_table_status(table: &str, status: StatusCode, body: &str) -> BackendError {
    if status == StatusCode::NOT_FOUND {
        missing_table(table)
    } else {
        classify_status(status, body, true)
    }
}
