//! Backend strategy traits.
//!
//! Each [`BackendKind`] has one [`BackendConnector`]. The resolver only
//! talks to these traits, so its state machine holds no backend code.

use crate::descriptor::{BackendDescriptor, BackendKind};
use crate::error::BackendResult;
use crate::query::{QueryOutput, QuerySpec};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An open session against one backend.
///
/// Implementations must be safe to call concurrently; pooling inside the
/// session is up to the native client.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Runs a trivial round trip to prove the backend is alive.
    async fn probe(&self) -> BackendResult<()>;

    /// Checks that every table in `tables` exists.
    ///
    /// A missing table is a [`BackendError::Structural`](crate::BackendError::Structural)
    /// naming it.
    async fn verify_tables(&self, tables: &[String]) -> BackendResult<()>;

    /// Forwards a query verbatim.
    ///
    /// A payload the backend kind cannot run is a
    /// [`BackendError::Query`](crate::BackendError::Query).
    async fn execute(&self, query: &QuerySpec) -> BackendResult<QueryOutput>;

    /// Releases the session.
    async fn close(&self);
}

/// Opens sessions for one backend kind.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// The kind this connector serves.
    fn kind(&self) -> BackendKind;

    /// Opens a session for `descriptor`.
    ///
    /// Errors must be classified: transient for conditions that may clear
    /// up, structural for anything retrying cannot fix.
    async fn connect(&self, descriptor: &BackendDescriptor)
        -> BackendResult<Box<dyn BackendSession>>;
}

/// Maps each backend kind to its connector.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<BackendKind, Arc<dyn BackendConnector>>,
}

impl ConnectorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every connector compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::backends::PostgresConnector::new()));
        #[cfg(feature = "rest")]
        registry.register(Arc::new(crate::backends::RestConnector::new()));
        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::backends::SqliteConnector::new()));
        registry
    }

    /// Registers a connector for its kind, replacing any previous one.
    pub fn register(&mut self, connector: Arc<dyn BackendConnector>) -> &mut Self {
        self.connectors.insert(connector.kind(), connector);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, connector: Arc<dyn BackendConnector>) -> Self {
        self.register(connector);
        self
    }

    /// Looks up the connector for a kind.
    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn BackendConnector>> {
        self.connectors.get(&kind).cloned()
    }

    /// Returns true if a connector is registered for `kind`.
    pub fn supports(&self, kind: BackendKind) -> bool {
        self.connectors.contains_key(&kind)
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.connectors.keys().map(BackendKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ConnectorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}
