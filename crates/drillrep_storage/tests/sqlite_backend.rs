//! Embedded file backend against real SQLite files.

#![cfg(feature = "sqlite")]

use drillrep_storage::{
    BackendKind, QuerySpec, ResolverConfig, ResolverError, ResolverState, RetryConfig,
    StorageResolver,
};
use drillrep_testkit::{descriptor, UserStore};
use serde_json::json;

fn file_resolver(spec: &str) -> StorageResolver {
    let config = ResolverConfig::new(vec![descriptor(BackendKind::EmbeddedFile, spec, 0)])
        .with_retry(RetryConfig::new(1));
    StorageResolver::with_defaults(config).unwrap()
}

#[tokio::test]
async fn reads_seeded_users() {
    let store = UserStore::seeded();
    let resolver = file_resolver(&store.spec());
    resolver.connect().await.unwrap();

    let output = resolver
        .execute(&QuerySpec::sql_with(
            "SELECT username, password_hash, role FROM users WHERE username = ?1",
            vec![json!("bcrypt_user")],
        ))
        .await
        .unwrap();

    let row = output.first().unwrap();
    assert_eq!(row["role"], json!("worker"));
    assert!(row["password_hash"].as_str().unwrap().starts_with("$2b$"));
}

#[tokio::test]
async fn accepts_sqlalchemy_style_url() {
    let store = UserStore::seeded();
    let resolver = file_resolver(&format!("sqlite:///{}", store.spec()));
    resolver.connect().await.unwrap();

    let output = resolver
        .execute(&QuerySpec::sql("SELECT count(*) AS n FROM users"))
        .await
        .unwrap();
    assert_eq!(output.first().unwrap()["n"], json!(4));
}

#[tokio::test]
async fn creates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.db");
    let resolver = file_resolver(&path.display().to_string());
    resolver.connect().await.unwrap();

    let created = resolver
        .execute(&QuerySpec::sql("CREATE TABLE reports (id INTEGER PRIMARY KEY, note TEXT)"))
        .await
        .unwrap();
    assert_eq!(created.rows_affected, 0);

    let inserted = resolver
        .execute(&QuerySpec::sql_with(
            "INSERT INTO reports (note) VALUES (?1), (?2)",
            vec![json!("rig 7"), json!(null)],
        ))
        .await
        .unwrap();
    assert_eq!(inserted.rows_affected, 2);
    assert!(path.exists());
}

#[tokio::test]
async fn foreign_file_is_structural() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "not a database\n".repeat(64)).unwrap();

    let resolver = file_resolver(&path.display().to_string());
    let err = resolver.connect().await.unwrap_err();
    assert_eq!(err.failures().len(), 1);
    assert!(err.failures()[0].is_structural(), "{err}");
    assert_eq!(resolver.state().await, ResolverState::Exhausted);
}

#[tokio::test]
async fn empty_file_loses_to_populated_store() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty.db");
    std::fs::File::create(&empty).unwrap();
    let store = UserStore::seeded();

    let config = ResolverConfig::new(vec![
        descriptor(BackendKind::EmbeddedFile, &empty.display().to_string(), 0),
        descriptor(BackendKind::EmbeddedFile, &store.spec(), 1),
    ])
    .with_retry(RetryConfig::new(2))
    .with_required_tables(["users"]);
    let resolver = StorageResolver::with_defaults(config).unwrap();

    let info = resolver.connect().await.unwrap();
    assert_eq!(info.index, 1);
    assert_eq!(info.skipped.len(), 1);
    assert!(info.skipped[0].is_structural());
    assert_eq!(info.skipped[0].attempts, 1);
    assert!(info.skipped[0].error.to_string().contains("users"));

    let output = resolver
        .execute(&QuerySpec::sql("SELECT count(*) AS n FROM users"))
        .await
        .unwrap();
    assert_eq!(output.first().unwrap()["n"], json!(4));
}

#[tokio::test]
async fn empty_file_alone_is_exhausted_when_tables_required() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty.db");

    let config = ResolverConfig::new(vec![descriptor(
        BackendKind::EmbeddedFile,
        &empty.display().to_string(),
        0,
    )])
    .with_retry(RetryConfig::new(1))
    .with_required_tables(["users"]);
    let resolver = StorageResolver::with_defaults(config).unwrap();

    let err = resolver.connect().await.unwrap_err();
    assert_eq!(err.failures().len(), 1);
    assert!(err.failures()[0].is_structural(), "{err}");
    assert_eq!(resolver.state().await, ResolverState::Exhausted);
}

#[tokio::test]
async fn unopenable_path_is_structural() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("nested").join("db.sqlite");

    let resolver = file_resolver(&path.display().to_string());
    let err = resolver.connect().await.unwrap_err();
    assert!(err.failures()[0].is_structural(), "{err}");
}

#[tokio::test]
async fn sql_errors_are_query_errors() {
    let store = UserStore::seeded();
    let resolver = file_resolver(&store.spec());
    resolver.connect().await.unwrap();

    let err = resolver
        .execute(&QuerySpec::sql("SELECT * FROM no_such_table"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolverError::Query(_)));
    assert_eq!(resolver.state().await, ResolverState::Connected(0));
}
