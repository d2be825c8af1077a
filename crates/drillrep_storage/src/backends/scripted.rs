//! Scripted in-memory backends for tests and dry runs.
//!
//! A [`ScriptedWorld`] holds one [`ScriptedBackend`] per connection spec.
//! Its registry serves every backend kind, so a resolver configured with
//! Postgres, REST and SQLite candidates can run against scripted behavior
//! without any network or file.

use crate::backend::{BackendConnector, BackendSession, ConnectorRegistry};
use crate::descriptor::{BackendDescriptor, BackendKind};
use crate::error::{BackendError, BackendResult};
use crate::query::{QueryOutput, QuerySpec};
use super::missing_table;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one scripted connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// The connect succeeds.
    Accept,
    /// The connect fails with a transient error.
    Transient(String),
    /// The connect fails with a structural error.
    Structural(String),
    /// The connect never completes.
    Hang,
}

impl ScriptStep {
    /// Shorthand for [`ScriptStep::Transient`].
    pub fn transient(message: impl Into<String>) -> Self {
        ScriptStep::Transient(message.into())
    }

    /// Shorthand for [`ScriptStep::Structural`].
    pub fn structural(message: impl Into<String>) -> Self {
        ScriptStep::Structural(message.into())
    }
}

/// Behavior of one scripted backend.
///
/// Connect attempts consume queued steps first, then repeat the default
/// step, which starts as [`ScriptStep::Accept`].
#[derive(Debug)]
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<ScriptStep>>,
    default_step: Mutex<ScriptStep>,
    healthy: AtomicBool,
    tables: Mutex<Option<HashSet<String>>>,
    query_delay: Mutex<Duration>,
    responses: Mutex<HashMap<String, QueryOutput>>,
    next_query_error: Mutex<Option<BackendError>>,
    executed: Mutex<Vec<QuerySpec>>,
    connect_attempts: AtomicU32,
    open_sessions: AtomicUsize,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            default_step: Mutex::new(ScriptStep::Accept),
            healthy: AtomicBool::new(true),
            tables: Mutex::new(None),
            query_delay: Mutex::new(Duration::ZERO),
            responses: Mutex::new(HashMap::new()),
            next_query_error: Mutex::new(None),
            executed: Mutex::new(Vec::new()),
            connect_attempts: AtomicU32::new(0),
            open_sessions: AtomicUsize::new(0),
        }
    }
}

impl ScriptedBackend {
    /// Queues steps for the next connect attempts.
    pub fn push_steps(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        self.steps.lock().extend(steps);
    }

    /// Sets the step used once the queue is empty.
    pub fn set_default(&self, step: ScriptStep) {
        *self.default_step.lock() = step;
    }

    /// Makes probes pass or fail.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Limits the tables this backend reports; every table exists until set.
    pub fn set_tables<I, S>(&self, tables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.tables.lock() = Some(tables.into_iter().map(Into::into).collect());
    }

    /// Delays every query by `delay`.
    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock() = delay;
    }

    /// Returns `output` for queries keyed by `key`.
    ///
    /// The key is the SQL statement or the REST resource name.
    pub fn respond(&self, key: impl Into<String>, output: QueryOutput) {
        self.responses.lock().insert(key.into(), output);
    }

    /// Fails the next query with `error`.
    pub fn fail_next_query(&self, error: BackendError) {
        *self.next_query_error.lock() = Some(error);
    }

    /// Connect attempts made so far.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Queries executed so far, in order.
    pub fn executed(&self) -> Vec<QuerySpec> {
        self.executed.lock().clone()
    }

    fn next_step(&self) -> ScriptStep {
        let queued = self.steps.lock().pop_front();
        queued.unwrap_or_else(|| self.default_step.lock().clone())
    }
}

fn query_key(query: &QuerySpec) -> &str {
    match query {
        QuerySpec::Sql { statement, .. } => statement,
        QuerySpec::Rest { resource, .. } => resource,
    }
}

/// A shared set of scripted backends keyed by connection spec.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWorld {
    backends: Arc<Mutex<HashMap<String, Arc<ScriptedBackend>>>>,
}

impl ScriptedWorld {
    /// Creates an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the backend for `connection_spec`, creating an accepting one.
    pub fn backend(&self, connection_spec: &str) -> Arc<ScriptedBackend> {
        Arc::clone(
            self.backends
                .lock()
                .entry(connection_spec.to_string())
                .or_default(),
        )
    }

    /// A connector for one kind, backed by this world.
    pub fn connector(&self, kind: BackendKind) -> ScriptedConnector {
        ScriptedConnector {
            kind,
            world: self.clone(),
        }
    }

    /// A registry serving every backend kind from this world.
    pub fn registry(&self) -> ConnectorRegistry {
        [
            BackendKind::DirectSql,
            BackendKind::RestGateway,
            BackendKind::EmbeddedFile,
        ]
        .into_iter()
        .fold(ConnectorRegistry::new(), |registry, kind| {
            registry.with(Arc::new(self.connector(kind)))
        })
    }
}

/// Connector that opens scripted sessions.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    kind: BackendKind,
    world: ScriptedWorld,
}

impl ScriptedConnector {
    /// Creates a connector for `kind` with its own world.
    pub fn for_kind(kind: BackendKind) -> Self {
        ScriptedWorld::new().connector(kind)
    }

    /// The world this connector draws backends from.
    pub fn world(&self) -> &ScriptedWorld {
        &self.world
    }
}

#[async_trait]
impl BackendConnector for ScriptedConnector {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn connect(
        &self,
        descriptor: &BackendDescriptor,
    ) -> BackendResult<Box<dyn BackendSession>> {
        let backend = self.world.backend(&descriptor.connection_spec);
        backend.connect_attempts.fetch_add(1, Ordering::SeqCst);

        match backend.next_step() {
            ScriptStep::Accept => {
                backend.open_sessions.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedSession {
                    backend,
                    closed: AtomicBool::new(false),
                }))
            }
            ScriptStep::Transient(message) => Err(BackendError::Transient(message)),
            ScriptStep::Structural(message) => Err(BackendError::Structural(message)),
            ScriptStep::Hang => {
                std::future::pending::<()>().await;
                Err(BackendError::transient("unreachable"))
            }
        }
    }
}

struct ScriptedSession {
    backend: Arc<ScriptedBackend>,
    closed: AtomicBool,
}

impl ScriptedSession {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::transient("session closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendSession for ScriptedSession {
    async fn probe(&self) -> BackendResult<()> {
        self.ensure_open()?;
        if self.backend.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::transient("probe failed"))
        }
    }

    async fn verify_tables(&self, tables: &[String]) -> BackendResult<()> {
        self.ensure_open()?;
        let present = self.backend.tables.lock();
        let Some(present) = present.as_ref() else {
            return Ok(());
        };
        match tables.iter().find(|t| !present.contains(t.as_str())) {
            Some(table) => Err(missing_table(table)),
            None => Ok(()),
        }
    }

    async fn execute(&self, query: &QuerySpec) -> BackendResult<QueryOutput> {
        self.ensure_open()?;

        let delay = *self.backend.query_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
            // Closed underneath a running query.
            self.ensure_open()?;
        }

        self.backend.executed.lock().push(query.clone());

        if let Some(error) = self.backend.next_query_error.lock().take() {
            return Err(error);
        }

        Ok(self
            .backend
            .responses
            .lock()
            .get(query_key(query))
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.backend.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.backend.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
