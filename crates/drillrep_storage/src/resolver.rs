//! Backend resolution state machine.
//!
//! ```text
//! Uninitialized ──connect()──▶ Connecting(0)
//! Connecting(i) ──probe ok──▶ Connected(i)
//! Connecting(i) ──transient, budget left──▶ Connecting(i)     (backoff)
//! Connecting(i) ──budget spent / structural──▶ Connecting(i+1) | Exhausted
//! Connected(i)  ──health check fails──▶ Degraded(i)
//! Degraded(i)   ──health check ok──▶ Connected(i)
//! Degraded(i)   ──threshold reached──▶ FailedOver(i+1) ──▶ Connecting(i+1)
//! ```
//!
//! All transitions happen under the write half of one lock. Queries hold the
//! read half for their whole duration, so a failover waits for in-flight
//! queries and new queries wait for the failover to settle.

use crate::backend::{BackendSession, ConnectorRegistry};
use crate::cancel::CancelToken;
use crate::config::ResolverConfig;
use crate::descriptor::BackendDescriptor;
use crate::error::{
    BackendError, BackendResult, CandidateFailure, ConfigResult, ConnectivityError, ResolverError,
    ResolverResult,
};
use crate::query::{QueryOutput, QuerySpec};
use chrono::{DateTime, Utc};
use parking_lot::RwLock as StatsLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The current state of a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    /// No connect has been attempted, or the resolver was shut down.
    Uninitialized,
    /// Attempting the candidate at this index.
    Connecting(usize),
    /// Healthy connection to the candidate at this index.
    Connected(usize),
    /// Connection at this index is failing health checks.
    Degraded(usize),
    /// Abandoned the previous candidate; about to try this index.
    FailedOver(usize),
    /// Every candidate failed. Only a new `connect()` leaves this state.
    Exhausted,
}

impl ResolverState {
    /// Returns true if queries may be executed.
    pub fn is_usable(&self) -> bool {
        matches!(self, ResolverState::Connected(_) | ResolverState::Degraded(_))
    }

    /// Index of the candidate the state refers to, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            ResolverState::Connecting(i)
            | ResolverState::Connected(i)
            | ResolverState::Degraded(i)
            | ResolverState::FailedOver(i) => Some(*i),
            ResolverState::Uninitialized | ResolverState::Exhausted => None,
        }
    }
}

impl fmt::Display for ResolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverState::Uninitialized => write!(f, "uninitialized"),
            ResolverState::Connecting(i) => write!(f, "connecting({i})"),
            ResolverState::Connected(i) => write!(f, "connected({i})"),
            ResolverState::Degraded(i) => write!(f, "degraded({i})"),
            ResolverState::FailedOver(i) => write!(f, "failed_over({i})"),
            ResolverState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Health of the active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Last check passed.
    Ok,
    /// Recent checks failed, below the failover threshold.
    Degraded,
    /// Failure confirmed; the connection was abandoned.
    Failed,
}

/// Snapshot of the active connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    /// Position of the candidate in priority order.
    pub index: usize,
    /// The candidate serving requests.
    pub descriptor: BackendDescriptor,
    /// When the connection was established.
    pub established_at: DateTime<Utc>,
    /// Health at the time of the snapshot.
    pub health: Health,
    /// Increases with every newly established connection.
    pub generation: u64,
    /// Earlier candidates abandoned on the way to this one.
    pub skipped: Vec<CandidateFailure>,
}

/// Statistics about resolver activity.
#[derive(Debug, Clone, Default)]
pub struct ResolverStats {
    /// Successful connects, including failovers.
    pub connects: u64,
    /// Connect attempts across all candidates.
    pub attempts: u64,
    /// Attempts that followed a backoff delay.
    pub retries: u64,
    /// Failovers triggered by confirmed degradation.
    pub failovers: u64,
    /// Health checks run, explicit or via failed queries.
    pub health_checks: u64,
    /// Health checks that failed.
    pub health_failures: u64,
    /// When the current or last connection was established.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

struct ActiveConnection {
    index: usize,
    descriptor: BackendDescriptor,
    session: Box<dyn BackendSession>,
    established_at: DateTime<Utc>,
    health: Health,
    generation: u64,
    skipped: Vec<CandidateFailure>,
}

impl ActiveConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            index: self.index,
            descriptor: self.descriptor.clone(),
            established_at: self.established_at,
            health: self.health,
            generation: self.generation,
            skipped: self.skipped.clone(),
        }
    }
}

struct ResolverInner {
    state: ResolverState,
    active: Option<ActiveConnection>,
    consecutive_failures: u32,
    generation: u64,
}

enum CandidateOutcome {
    Failed(CandidateFailure),
    Cancelled,
}

/// Establishes and maintains one connection out of an ordered candidate list.
///
/// Callers see one uniform [`execute`](Self::execute) regardless of which
/// candidate ended up serving. At most one connection is live at a time.
pub struct StorageResolver {
    config: ResolverConfig,
    candidates: Vec<BackendDescriptor>,
    registry: ConnectorRegistry,
    inner: RwLock<ResolverInner>,
    stats: StatsLock<ResolverStats>,
}

impl StorageResolver {
    /// Creates a resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(config: ResolverConfig, registry: ConnectorRegistry) -> ConfigResult<Self> {
        config.validate()?;
        let candidates = config.ordered_candidates();

        for descriptor in candidates.iter().filter(|d| !registry.supports(d.kind)) {
            tracing::warn!(
                backend = %descriptor,
                "no connector compiled in for candidate, it will always be skipped"
            );
        }

        Ok(Self {
            config,
            candidates,
            registry,
            inner: RwLock::new(ResolverInner {
                state: ResolverState::Uninitialized,
                active: None,
                consecutive_failures: 0,
                generation: 0,
            }),
            stats: StatsLock::new(ResolverStats::default()),
        })
    }

    /// Creates a resolver using every connector compiled into this build.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn with_defaults(config: ResolverConfig) -> ConfigResult<Self> {
        Self::new(config, ConnectorRegistry::with_defaults())
    }

    /// Candidates in the order they are tried.
    pub fn candidates(&self) -> &[BackendDescriptor] {
        &self.candidates
    }

    /// The configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Gets the current state. Waits for an in-flight transition.
    pub async fn state(&self) -> ResolverState {
        self.inner.read().await.state
    }

    /// Gets a snapshot of the active connection.
    pub async fn active(&self) -> Option<ConnectionInfo> {
        self.inner.read().await.active.as_ref().map(ActiveConnection::info)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ResolverStats {
        self.stats.read().clone()
    }

    /// Establishes a connection, or returns the one already active.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectivityError::Exhausted`] with one entry per attempted
    /// candidate if none could be reached.
    pub async fn connect(&self) -> Result<ConnectionInfo, ConnectivityError> {
        self.connect_with_cancel(&CancelToken::new()).await
    }

    /// Like [`connect`](Self::connect), abandoning the sequence once `cancel`
    /// fires. The token is checked before each attempt and during backoff.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectivityError::Cancelled`] if cancelled.
    pub async fn connect_with_cancel(
        &self,
        cancel: &CancelToken,
    ) -> Result<ConnectionInfo, ConnectivityError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        if inner.state.is_usable() {
            if let Some(active) = &inner.active {
                return Ok(active.info());
            }
        }

        self.connect_from(inner, 0, Vec::new(), cancel).await
    }

    /// Forwards a query to the active backend.
    ///
    /// # Errors
    ///
    /// - [`ResolverError::NotConnected`] unless connected or degraded
    /// - [`ResolverError::Query`] if the backend rejected the query
    /// - [`ResolverError::Backend`] if the connection failed during the query;
    ///   this counts as a failed health check
    pub async fn execute(&self, query: &QuerySpec) -> ResolverResult<QueryOutput> {
        let (generation, had_failures, result) = {
            let inner = self.inner.read().await;
            let active = match (&inner.active, inner.state.is_usable()) {
                (Some(active), true) => active,
                _ => return Err(ResolverError::NotConnected { state: inner.state }),
            };
            tracing::debug!(
                candidate = active.index,
                query = %query.summary(),
                "executing query"
            );
            let result = active.session.execute(query).await;
            (active.generation, inner.consecutive_failures > 0, result)
        };

        match result {
            Ok(output) => {
                if had_failures {
                    // Best effort, a stale generation is ignored.
                    let _ = self.record_outcome(generation, Ok(())).await;
                }
                Ok(output)
            }
            Err(BackendError::Query(message)) => Err(ResolverError::Query(message)),
            Err(error) => {
                tracing::warn!(error = %error, "connection failed during query");
                let _ = self.record_outcome(generation, Err(error.clone())).await;
                Err(ResolverError::Backend(error))
            }
        }
    }

    /// Probes the active connection and applies the health transitions.
    ///
    /// Returns [`Health::Failed`] when the check confirmed degradation and
    /// the resolver failed over to a later candidate.
    ///
    /// # Errors
    ///
    /// - [`ResolverError::NotConnected`] if there is no active connection
    /// - [`ResolverError::Connectivity`] if failover found no usable candidate
    pub async fn check_health(&self) -> ResolverResult<Health> {
        let (generation, outcome) = {
            let inner = self.inner.read().await;
            let active = match (&inner.active, inner.state.is_usable()) {
                (Some(active), true) => active,
                _ => return Err(ResolverError::NotConnected { state: inner.state }),
            };
            let outcome = self.bounded(active.session.probe()).await;
            (active.generation, outcome)
        };
        self.record_outcome(generation, outcome).await
    }

    /// Spawns a task that runs [`check_health`](Self::check_health) every
    /// `interval` while the resolver is connected.
    ///
    /// The task ends once the resolver is dropped.
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let resolver = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(resolver) = resolver.upgrade() else {
                    break;
                };
                if !resolver.state().await.is_usable() {
                    continue;
                }
                match resolver.check_health().await {
                    Ok(Health::Ok) => tracing::trace!("health check passed"),
                    Ok(Health::Degraded) => tracing::warn!("backend degraded"),
                    Ok(Health::Failed) => tracing::warn!("backend failed, resolver failed over"),
                    Err(e) => tracing::error!(error = %e, "health check failed"),
                }
            }
            tracing::debug!("health monitor stopped");
        })
    }

    /// Closes the active connection and returns to `Uninitialized`.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.write().await;
        if let Some(active) = inner.active.take() {
            active.session.close().await;
            tracing::info!(backend = %active.descriptor, "backend connection closed");
        }
        inner.state = ResolverState::Uninitialized;
        inner.consecutive_failures = 0;
    }

    /// Runs the connect sequence starting at candidate `start`, appending to
    /// `failures` already collected by the caller.
    async fn connect_from(
        &self,
        inner: &mut ResolverInner,
        start: usize,
        mut failures: Vec<CandidateFailure>,
        cancel: &CancelToken,
    ) -> Result<ConnectionInfo, ConnectivityError> {
        if self.candidates.is_empty() {
            return Err(ConnectivityError::NoCandidates);
        }

        for (index, descriptor) in self.candidates.iter().enumerate().skip(start) {
            inner.state = ResolverState::Connecting(index);
            tracing::debug!(candidate = index, backend = %descriptor, "trying backend candidate");

            match self.attempt_candidate(index, descriptor, cancel).await {
                Ok((session, attempts)) => {
                    inner.generation += 1;
                    let active = ActiveConnection {
                        index,
                        descriptor: descriptor.clone(),
                        session,
                        established_at: Utc::now(),
                        health: Health::Ok,
                        generation: inner.generation,
                        skipped: std::mem::take(&mut failures),
                    };
                    let info = active.info();
                    inner.active = Some(active);
                    inner.state = ResolverState::Connected(index);
                    inner.consecutive_failures = 0;

                    {
                        let mut stats = self.stats.write();
                        stats.connects += 1;
                        stats.last_connected_at = Some(info.established_at);
                    }
                    tracing::info!(
                        candidate = index,
                        kind = %descriptor.kind,
                        attempts,
                        "backend connected"
                    );
                    return Ok(info);
                }
                Err(CandidateOutcome::Cancelled) => {
                    inner.state = ResolverState::Uninitialized;
                    tracing::info!(candidate = index, "connect cancelled");
                    return Err(ConnectivityError::Cancelled);
                }
                Err(CandidateOutcome::Failed(failure)) => {
                    tracing::warn!(
                        candidate = index,
                        kind = %descriptor.kind,
                        attempts = failure.attempts,
                        structural = failure.is_structural(),
                        error = %failure.error,
                        "backend candidate abandoned"
                    );
                    failures.push(failure);
                }
            }
        }

        inner.state = ResolverState::Exhausted;
        let error = ConnectivityError::Exhausted { failures };
        tracing::error!(error = %error, "no backend candidate reachable");
        self.stats.write().last_error = Some(error.to_string());
        Err(error)
    }

    /// Tries one candidate within its retry budget.
    async fn attempt_candidate(
        &self,
        index: usize,
        descriptor: &BackendDescriptor,
        cancel: &CancelToken,
    ) -> Result<(Box<dyn BackendSession>, u32), CandidateOutcome> {
        let Some(connector) = self.registry.get(descriptor.kind) else {
            return Err(CandidateOutcome::Failed(CandidateFailure {
                index,
                descriptor: descriptor.clone(),
                attempts: 0,
                error: BackendError::structural(format!(
                    "no connector registered for {}",
                    descriptor.kind
                )),
            }));
        };

        let retry = &self.config.retry;
        let required = self.config.required_tables.as_slice();
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt);
                tracing::debug!(
                    candidate = index,
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "backing off before retry"
                );
                self.stats.write().retries += 1;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(CandidateOutcome::Cancelled),
                }
            }

            if cancel.is_cancelled() {
                return Err(CandidateOutcome::Cancelled);
            }

            attempt += 1;
            self.stats.write().attempts += 1;

            let result = self
                .bounded(async {
                    let session = connector.connect(descriptor).await?;
                    let checked = match session.probe().await {
                        Ok(()) if required.is_empty() => Ok(()),
                        Ok(()) => session.verify_tables(required).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = checked {
                        session.close().await;
                        return Err(e);
                    }
                    Ok(session)
                })
                .await;

            match result {
                Ok(session) => return Ok((session, attempt)),
                Err(error) => {
                    tracing::debug!(
                        candidate = index,
                        attempt,
                        error = %error,
                        "connect attempt failed"
                    );
                    self.stats.write().last_error = Some(error.to_string());

                    if !error.is_retryable() || attempt >= retry.max_attempts {
                        return Err(CandidateOutcome::Failed(CandidateFailure {
                            index,
                            descriptor: descriptor.clone(),
                            attempts: attempt,
                            error,
                        }));
                    }
                }
            }
        }
    }

    /// Applies the probe timeout to a backend call.
    async fn bounded<T, F>(&self, call: F) -> BackendResult<T>
    where
        F: std::future::Future<Output = BackendResult<T>>,
    {
        let limit = self.config.probe_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::transient(format!(
                "timed out after {} ms",
                limit.as_millis()
            ))),
        }
    }

    /// Applies a health outcome to the connection of `generation`.
    async fn record_outcome(
        &self,
        generation: u64,
        outcome: BackendResult<()>,
    ) -> ResolverResult<Health> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let active = match inner.active.as_mut() {
            Some(active) if active.generation == generation => active,
            // The connection was replaced while the check ran.
            Some(active) => return Ok(active.health),
            None => return Err(ResolverError::NotConnected { state: inner.state }),
        };

        self.stats.write().health_checks += 1;

        let error = match outcome {
            Ok(()) => {
                inner.consecutive_failures = 0;
                active.health = Health::Ok;
                if let ResolverState::Degraded(index) = inner.state {
                    inner.state = ResolverState::Connected(index);
                    tracing::info!(candidate = index, "backend recovered");
                }
                return Ok(Health::Ok);
            }
            Err(error) => error,
        };

        inner.consecutive_failures += 1;
        {
            let mut stats = self.stats.write();
            stats.health_failures += 1;
            stats.last_error = Some(error.to_string());
        }

        let index = active.index;
        active.health = Health::Degraded;
        inner.state = ResolverState::Degraded(index);

        if inner.consecutive_failures < self.config.degrade_threshold {
            tracing::warn!(
                candidate = index,
                failures = inner.consecutive_failures,
                threshold = self.config.degrade_threshold,
                error = %error,
                "backend degraded"
            );
            return Ok(Health::Degraded);
        }

        tracing::error!(
            candidate = index,
            failures = inner.consecutive_failures,
            error = %error,
            "backend failure confirmed, failing over"
        );
        self.fail_over(inner, error).await?;
        Ok(Health::Failed)
    }

    /// Abandons the active connection and connects to the next candidate.
    ///
    /// The abandoned candidate leads the failure list of any resulting
    /// `Exhausted` error.
    async fn fail_over(
        &self,
        inner: &mut ResolverInner,
        error: BackendError,
    ) -> ResolverResult<ConnectionInfo> {
        let Some(failed) = inner.active.take() else {
            return Err(ResolverError::NotConnected { state: inner.state });
        };
        let next = failed.index + 1;
        let abandoned = CandidateFailure {
            index: failed.index,
            descriptor: failed.descriptor.clone(),
            attempts: inner.consecutive_failures,
            error,
        };
        inner.state = ResolverState::FailedOver(next);
        inner.consecutive_failures = 0;
        self.stats.write().failovers += 1;

        failed.session.close().await;

        if next >= self.candidates.len() {
            inner.state = ResolverState::Exhausted;
            let error = ConnectivityError::Exhausted {
                failures: vec![abandoned],
            };
            tracing::error!(error = %error, "no candidate left to fail over to");
            self.stats.write().last_error = Some(error.to_string());
            return Err(error.into());
        }

        Ok(self
            .connect_from(inner, next, vec![abandoned], &CancelToken::new())
            .await?)
    }
}

impl fmt::Debug for StorageResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageResolver")
            .field("candidates", &self.candidates)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ScriptStep, ScriptedWorld};
    use crate::config::RetryConfig;
    use crate::descriptor::BackendKind;

    fn candidates(specs: &[(BackendKind, &str)]) -> Vec<BackendDescriptor> {
        specs
            .iter()
            .enumerate()
            .map(|(i, (kind, spec))| BackendDescriptor::new(*kind, *spec, i as i32))
            .collect()
    }

    fn resolver(world: &ScriptedWorld, specs: &[(BackendKind, &str)]) -> StorageResolver {
        let config = ResolverConfig::new(candidates(specs))
            .with_retry(RetryConfig::new(3).with_initial_delay(Duration::from_millis(10)))
            .with_degrade_threshold(2)
            .with_probe_timeout(Duration::from_secs(1));
        StorageResolver::new(config, world.registry()).unwrap()
    }

    #[test]
    fn state_display_and_usability() {
        assert_eq!(ResolverState::Connecting(2).to_string(), "connecting(2)");
        assert!(ResolverState::Degraded(0).is_usable());
        assert!(!ResolverState::FailedOver(1).is_usable());
        assert_eq!(ResolverState::Exhausted.index(), None);
        assert_eq!(ResolverState::Connected(3).index(), Some(3));
    }

    #[test]
    fn rejects_invalid_config() {
        let world = ScriptedWorld::new();
        assert!(StorageResolver::new(ResolverConfig::default(), world.registry()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn starts_uninitialized_and_connects_to_first() {
        let world = ScriptedWorld::new();
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg"), (BackendKind::EmbeddedFile, "f")]);
        assert_eq!(resolver.state().await, ResolverState::Uninitialized);

        let info = resolver.connect().await.unwrap();
        assert_eq!(info.index, 0);
        assert_eq!(info.health, Health::Ok);
        assert_eq!(resolver.state().await, ResolverState::Connected(0));
        assert_eq!(world.backend("f").connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent_while_connected() {
        let world = ScriptedWorld::new();
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg")]);
        let first = resolver.connect().await.unwrap();
        let second = resolver.connect().await.unwrap();
        assert_eq!(first.generation, second.generation);
        assert_eq!(world.backend("pg").connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_within_budget() {
        let world = ScriptedWorld::new();
        world
            .backend("pg")
            .push_steps([ScriptStep::transient("refused"), ScriptStep::transient("refused")]);
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg"), (BackendKind::EmbeddedFile, "f")]);

        let info = resolver.connect().await.unwrap();
        assert_eq!(info.index, 0);
        assert_eq!(world.backend("pg").connect_attempts(), 3);
        let stats = resolver.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let world = ScriptedWorld::new();
        world.backend("pg").set_default(ScriptStep::transient("refused"));
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg"), (BackendKind::EmbeddedFile, "f")]);

        let started = tokio::time::Instant::now();
        resolver.connect().await.unwrap();
        // 10 ms + 20 ms of backoff for three attempts.
        assert_eq!(started.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn structural_error_skips_without_retry() {
        let world = ScriptedWorld::new();
        world.backend("pg").set_default(ScriptStep::structural("password authentication failed"));
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg"), (BackendKind::EmbeddedFile, "f")]);

        let info = resolver.connect().await.unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(info.skipped.len(), 1);
        assert!(info.skipped[0].is_structural());
        assert_eq!(world.backend("pg").connect_attempts(), 1);
        assert_eq!(resolver.stats().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_probe_counts_as_failed_attempt() {
        let world = ScriptedWorld::new();
        world.backend("pg").set_healthy(false);
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg"), (BackendKind::EmbeddedFile, "f")]);

        let info = resolver.connect().await.unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(world.backend("pg").connect_attempts(), 3);
        assert_eq!(world.backend("pg").open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_required_table_skips_candidate() {
        let world = ScriptedWorld::new();
        world.backend("pg").set_tables(["reports"]);
        world.backend("f").set_tables(["users", "reports"]);
        let config = ResolverConfig::new(candidates(&[
            (BackendKind::DirectSql, "pg"),
            (BackendKind::EmbeddedFile, "f"),
        ]))
        .with_required_tables(["users", "reports"]);
        let resolver = StorageResolver::new(config, world.registry()).unwrap();

        let info = resolver.connect().await.unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(info.skipped.len(), 1);
        assert!(info.skipped[0].is_structural());
        assert!(info.skipped[0].error.to_string().contains("missing table: users"));
        assert_eq!(world.backend("pg").connect_attempts(), 1);
        assert_eq!(world.backend("pg").open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tables_are_not_checked_unless_required() {
        let world = ScriptedWorld::new();
        world.backend("pg").set_tables(Vec::<String>::new());
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg")]);

        assert_eq!(resolver.connect().await.unwrap().index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_connect_times_out_and_is_transient() {
        let world = ScriptedWorld::new();
        world.backend("pg").set_default(ScriptStep::Hang);
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg"), (BackendKind::EmbeddedFile, "f")]);

        let info = resolver.connect().await.unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(world.backend("pg").connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_is_terminal_until_next_connect() {
        let world = ScriptedWorld::new();
        world.backend("pg").set_default(ScriptStep::structural("bad auth"));
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg")]);

        let err = resolver.connect().await.unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(resolver.state().await, ResolverState::Exhausted);
        assert_eq!(world.backend("pg").connect_attempts(), 1);

        let err = resolver.execute(&QuerySpec::sql("SELECT 1")).await.unwrap_err();
        assert!(matches!(
            err,
            ResolverError::NotConnected {
                state: ResolverState::Exhausted
            }
        ));

        world.backend("pg").set_default(ScriptStep::Accept);
        resolver.connect().await.unwrap();
        assert_eq!(resolver.state().await, ResolverState::Connected(0));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_connector_is_structural() {
        let world = ScriptedWorld::new();
        let registry = ConnectorRegistry::new().with(Arc::new(world.connector(BackendKind::EmbeddedFile)));
        let config = ResolverConfig::new(candidates(&[
            (BackendKind::DirectSql, "pg"),
            (BackendKind::EmbeddedFile, "f"),
        ]));
        let resolver = StorageResolver::new(config, registry).unwrap();

        let info = resolver.connect().await.unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(world.backend("pg").connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_requires_connection() {
        let world = ScriptedWorld::new();
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg")]);
        let err = resolver.execute(&QuerySpec::sql("SELECT 1")).await.unwrap_err();
        assert!(matches!(
            err,
            ResolverError::NotConnected {
                state: ResolverState::Uninitialized
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn query_errors_do_not_degrade() {
        let world = ScriptedWorld::new();
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg")]);
        resolver.connect().await.unwrap();

        for _ in 0..5 {
            world.backend("pg").fail_next_query(BackendError::query("duplicate key"));
            let err = resolver.execute(&QuerySpec::sql("INSERT")).await.unwrap_err();
            assert!(matches!(err, ResolverError::Query(_)));
        }
        assert_eq!(resolver.state().await, ResolverState::Connected(0));
        assert_eq!(resolver.stats().failovers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn health_degrades_recovers_and_fails_over() {
        let world = ScriptedWorld::new();
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg"), (BackendKind::EmbeddedFile, "f")]);
        resolver.connect().await.unwrap();

        world.backend("pg").set_healthy(false);
        assert_eq!(resolver.check_health().await.unwrap(), Health::Degraded);
        assert_eq!(resolver.state().await, ResolverState::Degraded(0));

        world.backend("pg").set_healthy(true);
        assert_eq!(resolver.check_health().await.unwrap(), Health::Ok);
        assert_eq!(resolver.state().await, ResolverState::Connected(0));

        world.backend("pg").set_healthy(false);
        assert_eq!(resolver.check_health().await.unwrap(), Health::Degraded);
        assert_eq!(resolver.check_health().await.unwrap(), Health::Failed);
        assert_eq!(resolver.state().await, ResolverState::Connected(1));
        assert_eq!(world.backend("pg").open_sessions(), 0);

        let active = resolver.active().await.unwrap();
        assert_eq!(active.skipped.len(), 1);
        assert_eq!(active.skipped[0].index, 0);
        assert_eq!(active.skipped[0].attempts, 2);

        let stats = resolver.stats();
        assert_eq!(stats.failovers, 1);
        assert_eq!(stats.connects, 2);
        assert_eq!(resolver.active().await.unwrap().generation, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_over_past_last_candidate_exhausts() {
        let world = ScriptedWorld::new();
        let resolver = resolver(&world, &[(BackendKind::EmbeddedFile, "f")]);
        resolver.connect().await.unwrap();

        world.backend("f").set_healthy(false);
        assert_eq!(resolver.check_health().await.unwrap(), Health::Degraded);
        let err = resolver.check_health().await.unwrap_err();
        match &err {
            ResolverError::Connectivity(ConnectivityError::Exhausted { failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 0);
                assert_eq!(failures[0].descriptor.connection_spec, "f");
                assert_eq!(failures[0].attempts, 2);
                assert!(failures[0].error.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("probe failed"), "{err}");
        assert_eq!(resolver.state().await, ResolverState::Exhausted);
        assert!(resolver.active().await.is_none());
        assert_eq!(world.backend("f").open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_errors_during_execute_count_as_health_failures() {
        let world = ScriptedWorld::new();
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg"), (BackendKind::EmbeddedFile, "f")]);
        resolver.connect().await.unwrap();

        world.backend("pg").fail_next_query(BackendError::transient("reset by peer"));
        let err = resolver.execute(&QuerySpec::sql("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, ResolverError::Backend(_)));
        assert_eq!(resolver.state().await, ResolverState::Degraded(0));

        // A successful query clears the failure streak.
        resolver.execute(&QuerySpec::sql("SELECT 1")).await.unwrap();
        assert_eq!(resolver.state().await, ResolverState::Connected(0));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff() {
        let world = ScriptedWorld::new();
        world.backend("pg").set_default(ScriptStep::transient("refused"));
        let config = ResolverConfig::new(candidates(&[(BackendKind::DirectSql, "pg")]))
            .with_retry(RetryConfig::new(10).with_initial_delay(Duration::from_secs(60)));
        let resolver = Arc::new(StorageResolver::new(config, world.registry()).unwrap());
        let cancel = CancelToken::new();

        let task = {
            let resolver = Arc::clone(&resolver);
            let cancel = cancel.clone();
            tokio::spawn(async move { resolver.connect_with_cancel(&cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err, ConnectivityError::Cancelled);
        assert_eq!(world.backend("pg").connect_attempts(), 1);
        assert_eq!(resolver.state().await, ResolverState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start() {
        let world = ScriptedWorld::new();
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg")]);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            resolver.connect_with_cancel(&cancel).await.unwrap_err(),
            ConnectivityError::Cancelled
        );
        assert_eq!(world.backend("pg").connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_connect_leaves_consistent_state() {
        let world = ScriptedWorld::new();
        world.backend("pg").set_default(ScriptStep::Hang);
        let config = ResolverConfig::new(candidates(&[(BackendKind::DirectSql, "pg")]))
            .with_probe_timeout(Duration::from_secs(30));
        let resolver = StorageResolver::new(config, world.registry()).unwrap();

        let abandoned = tokio::time::timeout(Duration::from_secs(1), resolver.connect()).await;
        assert!(abandoned.is_err());
        assert!(!resolver.state().await.is_usable());
        assert!(resolver.active().await.is_none());

        world.backend("pg").set_default(ScriptStep::Accept);
        resolver.connect().await.unwrap();
        assert_eq!(resolver.state().await, ResolverState::Connected(0));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_session() {
        let world = ScriptedWorld::new();
        let resolver = resolver(&world, &[(BackendKind::DirectSql, "pg")]);
        resolver.connect().await.unwrap();
        assert_eq!(world.backend("pg").open_sessions(), 1);

        resolver.shutdown().await;
        assert_eq!(world.backend("pg").open_sessions(), 0);
        assert_eq!(resolver.state().await, ResolverState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn health_monitor_fails_over_in_background() {
        let world = ScriptedWorld::new();
        let resolver = Arc::new(resolver(
            &world,
            &[(BackendKind::DirectSql, "pg"), (BackendKind::EmbeddedFile, "f")],
        ));
        resolver.connect().await.unwrap();
        let monitor = resolver.spawn_health_monitor(Duration::from_secs(5));

        world.backend("pg").set_healthy(false);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(resolver.state().await, ResolverState::Connected(1));

        monitor.abort();
    }
}
