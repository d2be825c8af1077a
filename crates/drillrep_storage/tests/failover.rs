//! Resolver scenarios over scripted backends.

use drillrep_storage::backends::{ScriptStep, ScriptedWorld};
use drillrep_storage::{
    BackendError, BackendKind, ConnectivityError, Health, QueryOutput, QuerySpec, ResolverError,
    ResolverState,
};
use drillrep_testkit::{descriptor, fast_config, scripted_resolver, three_tier_candidates};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PG: &str = "postgresql://app:pw@db.internal/reports";
const REST: &str = "https://proj.supabase.co?apikey=anon";
const FILE: &str = "./bur_reports.db";

#[tokio::test(start_paused = true)]
async fn timeout_then_structural_then_ok() {
    let world = ScriptedWorld::new();
    world.backend("a").set_default(ScriptStep::Hang);
    world
        .backend("b")
        .set_default(ScriptStep::structural("password authentication failed"));

    let resolver = scripted_resolver(
        &world,
        fast_config(
            vec![
                descriptor(BackendKind::DirectSql, "a", 0),
                descriptor(BackendKind::DirectSql, "b", 1),
                descriptor(BackendKind::EmbeddedFile, "c", 2),
            ],
            3,
        ),
    );

    let info = resolver.connect().await.unwrap();
    assert_eq!(info.index, 2);
    assert_eq!(resolver.state().await, ResolverState::Connected(2));
    assert_eq!(world.backend("a").connect_attempts(), 3);
    assert_eq!(world.backend("b").connect_attempts(), 1);
    assert_eq!(world.backend("c").connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_reports_each_candidate_in_order() {
    let world = ScriptedWorld::new();
    world.backend(PG).set_default(ScriptStep::transient("connection refused"));
    world.backend(REST).set_default(ScriptStep::structural("401 Unauthorized"));
    world.backend(FILE).set_default(ScriptStep::structural("file is not a database"));

    let resolver = scripted_resolver(&world, fast_config(three_tier_candidates(), 2));
    let err = resolver.connect().await.unwrap_err();

    let failures = err.failures();
    assert_eq!(failures.len(), 3);
    assert_eq!(
        failures.iter().map(|f| f.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(failures[0].attempts, 2);
    assert!(failures[0].error.is_retryable());
    assert_eq!(failures[1].attempts, 1);
    assert!(failures[1].is_structural());
    assert_eq!(
        failures[2].error,
        BackendError::structural("file is not a database")
    );

    let text = err.to_string();
    assert!(text.contains("connection refused"));
    assert!(text.contains("401 Unauthorized"));
    assert!(!text.contains("apikey=anon"), "spec leaked: {text}");
    assert_eq!(resolver.state().await, ResolverState::Exhausted);
}

#[tokio::test(start_paused = true)]
async fn bad_postgres_credentials_fall_through_to_rest() {
    let world = ScriptedWorld::new();
    world
        .backend(PG)
        .set_default(ScriptStep::structural("password authentication failed for user \"app\""));

    let resolver = scripted_resolver(&world, fast_config(three_tier_candidates(), 3));
    let info = resolver.connect().await.unwrap();

    assert_eq!(info.descriptor.kind, BackendKind::RestGateway);
    assert_eq!(resolver.state().await, ResolverState::Connected(1));
    assert_eq!(world.backend(PG).connect_attempts(), 1);
    assert_eq!(world.backend(FILE).connect_attempts(), 0);

    let rows = json!([{"username": "bob", "role": "worker"}]);
    let rows = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_object().cloned().unwrap())
        .collect();
    world.backend(REST).respond("users", QueryOutput::from_rows(rows));

    let output = resolver
        .execute(&QuerySpec::rest_get("users", Some("username=eq.bob".into())))
        .await
        .unwrap();
    assert_eq!(output.first().unwrap()["role"], json!("worker"));
}

#[tokio::test(start_paused = true)]
async fn priority_order_wins_over_list_order() {
    let world = ScriptedWorld::new();
    let resolver = scripted_resolver(
        &world,
        fast_config(
            vec![
                descriptor(BackendKind::EmbeddedFile, "file", 5),
                descriptor(BackendKind::DirectSql, "pg", 1),
            ],
            1,
        ),
    );
    let info = resolver.connect().await.unwrap();
    assert_eq!(info.descriptor.connection_spec, "pg");
    assert_eq!(world.backend("file").connect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_queries_never_see_closed_session() {
    let world = ScriptedWorld::new();
    world.backend(PG).set_query_delay(Duration::from_millis(50));
    world.backend(REST).set_query_delay(Duration::from_millis(50));

    let resolver = Arc::new(scripted_resolver(
        &world,
        fast_config(three_tier_candidates(), 1).with_degrade_threshold(1),
    ));
    resolver.connect().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..20u64 {
        let resolver = Arc::clone(&resolver);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(i * 7)).await;
            resolver.execute(&QuerySpec::sql("SELECT 1")).await
        }));
    }

    // Fail over while queries are in flight.
    tokio::time::sleep(Duration::from_millis(30)).await;
    world.backend(PG).set_healthy(false);
    assert_eq!(resolver.check_health().await.unwrap(), Health::Failed);

    for task in tasks {
        let result = task.await.unwrap();
        if let Err(e) = result {
            panic!("query observed a broken backend: {e}");
        }
    }

    assert_eq!(resolver.state().await, ResolverState::Connected(1));
    let served = world.backend(PG).executed().len() + world.backend(REST).executed().len();
    assert_eq!(served, 20);
    assert_eq!(world.backend(PG).open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn query_failure_fails_over_under_concurrent_load() {
    let world = ScriptedWorld::new();
    world.backend(PG).set_query_delay(Duration::from_millis(50));
    world.backend(REST).set_query_delay(Duration::from_millis(50));
    // Taken by the first query to finish, which belongs to task 0.
    world
        .backend(PG)
        .fail_next_query(BackendError::transient("connection reset"));

    let resolver = Arc::new(scripted_resolver(
        &world,
        fast_config(three_tier_candidates(), 1).with_degrade_threshold(1),
    ));
    resolver.connect().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..20u64 {
        let resolver = Arc::clone(&resolver);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(i * 7)).await;
            resolver.execute(&QuerySpec::sql("SELECT 1")).await
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    match &results[0] {
        Err(ResolverError::Backend(e)) => assert!(e.to_string().contains("connection reset")),
        other => panic!("expected the injected failure, got {other:?}"),
    }
    for (i, result) in results.iter().enumerate().skip(1) {
        if let Err(e) = result {
            panic!("task {i} observed a broken backend: {e}");
        }
    }

    assert_eq!(resolver.state().await, ResolverState::Connected(1));
    assert_eq!(resolver.stats().failovers, 1);
    let served = world.backend(PG).executed().len() + world.backend(REST).executed().len();
    assert_eq!(served, 20);
    assert!(!world.backend(REST).executed().is_empty());
    assert_eq!(world.backend(PG).open_sessions(), 0);
    assert_eq!(world.backend(REST).open_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn failover_walks_forward_only() {
    let world = ScriptedWorld::new();
    let resolver = scripted_resolver(&world, fast_config(three_tier_candidates(), 1));
    resolver.connect().await.unwrap();

    world.backend(PG).set_healthy(false);
    resolver.check_health().await.unwrap();
    resolver.check_health().await.unwrap();
    assert_eq!(resolver.state().await, ResolverState::Connected(1));

    // The first candidate recovering does not pull the resolver back.
    world.backend(PG).set_healthy(true);
    world.backend(REST).set_healthy(false);
    resolver.check_health().await.unwrap();
    resolver.check_health().await.unwrap();
    assert_eq!(resolver.state().await, ResolverState::Connected(2));
    assert_eq!(resolver.stats().failovers, 2);
}

#[tokio::test(start_paused = true)]
async fn failover_target_down_exhausts() {
    let world = ScriptedWorld::new();
    let resolver = scripted_resolver(
        &world,
        fast_config(
            vec![
                descriptor(BackendKind::DirectSql, "pg", 0),
                descriptor(BackendKind::EmbeddedFile, "file", 1),
            ],
            2,
        ),
    );
    resolver.connect().await.unwrap();

    world.backend("pg").set_healthy(false);
    world.backend("file").set_default(ScriptStep::transient("locked"));
    resolver.check_health().await.unwrap();
    let err = resolver.check_health().await.unwrap_err();

    match err {
        ResolverError::Connectivity(ConnectivityError::Exhausted { failures }) => {
            assert_eq!(failures.len(), 2);
            // The degraded candidate comes first, then the failover target.
            assert_eq!(failures[0].index, 0);
            assert_eq!(failures[0].descriptor.connection_spec, "pg");
            assert_eq!(failures[0].attempts, 2);
            assert!(failures[0].error.is_retryable());
            assert_eq!(failures[1].index, 1);
            assert_eq!(failures[1].attempts, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(resolver.state().await, ResolverState::Exhausted);

    // A fresh connect starts over from the top.
    world.backend("pg").set_healthy(true);
    let info = resolver.connect().await.unwrap();
    assert_eq!(info.index, 0);
}

#[tokio::test(start_paused = true)]
async fn query_errors_pass_through() {
    let world = ScriptedWorld::new();
    let resolver = scripted_resolver(&world, fast_config(three_tier_candidates(), 1));
    resolver.connect().await.unwrap();

    world
        .backend(PG)
        .fail_next_query(BackendError::query("relation \"userz\" does not exist"));
    let err = resolver
        .execute(&QuerySpec::sql("SELECT * FROM userz"))
        .await
        .unwrap_err();
    assert!(!err.is_connectivity());
    assert!(err.to_string().contains("userz"));
    assert_eq!(resolver.state().await, ResolverState::Connected(0));
}
