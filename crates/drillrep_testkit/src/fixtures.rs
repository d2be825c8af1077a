//! Test fixtures: credentials, candidate lists and user stores.

use drillrep_auth::{hash_password_with_cost, hash_pbkdf2, sha256_hex};
use drillrep_storage::backends::ScriptedWorld;
use drillrep_storage::{
    BackendDescriptor, BackendKind, ResolverConfig, RetryConfig, StorageResolver,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// bcrypt cost used by fixtures; the minimum bcrypt accepts.
pub const FIXTURE_BCRYPT_COST: u32 = 4;

/// PBKDF2 rounds used by fixtures.
pub const FIXTURE_PBKDF2_ITERATIONS: u32 = 1_000;

/// A password together with its stored form.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    /// Short label naming the stored scheme.
    pub label: &'static str,
    /// The password a user would type.
    pub password: String,
    /// The value found in the user store.
    pub stored: String,
}

/// One stored credential per supported scheme for `password`.
pub fn credential_set(password: &str) -> Vec<StoredCredential> {
    vec![
        StoredCredential {
            label: "bcrypt",
            password: password.to_string(),
            stored: hash_password_with_cost(password, FIXTURE_BCRYPT_COST)
                .expect("bcrypt fixture"),
        },
        StoredCredential {
            label: "pbkdf2",
            password: password.to_string(),
            stored: hash_pbkdf2(password, FIXTURE_PBKDF2_ITERATIONS).expect("pbkdf2 fixture"),
        },
        StoredCredential {
            label: "sha256-hex",
            password: password.to_string(),
            stored: sha256_hex(password),
        },
        StoredCredential {
            label: "plaintext",
            password: password.to_string(),
            stored: password.to_string(),
        },
    ]
}

/// Builds a descriptor.
pub fn descriptor(kind: BackendKind, spec: &str, priority: i32) -> BackendDescriptor {
    BackendDescriptor::new(kind, spec, priority)
}

/// The usual three-tier candidate list: Postgres, then REST, then SQLite.
pub fn three_tier_candidates() -> Vec<BackendDescriptor> {
    vec![
        descriptor(BackendKind::DirectSql, "postgresql://app:pw@db.internal/reports", 0),
        descriptor(BackendKind::RestGateway, "https://proj.supabase.co?apikey=anon", 1),
        descriptor(BackendKind::EmbeddedFile, "./bur_reports.db", 2),
    ]
}

/// A resolver configuration with short delays, for paused-time tests.
pub fn fast_config(candidates: Vec<BackendDescriptor>, max_attempts: u32) -> ResolverConfig {
    ResolverConfig::new(candidates)
        .with_retry(RetryConfig::new(max_attempts).with_initial_delay(Duration::from_millis(10)))
        .with_degrade_threshold(2)
        .with_probe_timeout(Duration::from_secs(1))
}

/// A resolver over scripted backends.
pub fn scripted_resolver(world: &ScriptedWorld, config: ResolverConfig) -> StorageResolver {
    StorageResolver::new(config, world.registry()).expect("valid resolver config")
}

/// A user record written by [`UserStore::seeded`].
#[derive(Debug, Clone)]
pub struct SeededUser {
    /// Login name.
    pub username: String,
    /// The password that logs this user in.
    pub password: String,
    /// `worker` or `dispatcher`.
    pub role: &'static str,
    /// Scheme label of the stored credential.
    pub scheme: &'static str,
}

/// A SQLite user store in a temporary directory.
pub struct UserStore {
    path: PathBuf,
    users: Vec<SeededUser>,
    _temp_dir: TempDir,
}

impl UserStore {
    /// Creates an empty store with the `users` and `reports` tables.
    pub fn empty() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("users.db");
        let conn = rusqlite::Connection::open(&path).expect("Failed to create user store");
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT,
                full_name TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date_time TEXT,
                location TEXT,
                rig_number TEXT,
                meterage REAL,
                pogon REAL,
                operation TEXT,
                note TEXT,
                operator_name TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .expect("Failed to create user store tables");

        Self {
            path,
            users: Vec::new(),
            _temp_dir: temp_dir,
        }
    }

    /// Creates a store with one user per stored scheme.
    ///
    /// Users are named after the scheme (`bcrypt_user`, `sha256_hex_user`, ...),
    /// share the password `1234` and alternate between worker and dispatcher.
    pub fn seeded() -> Self {
        let mut store = Self::empty();
        for (i, credential) in credential_set("1234").into_iter().enumerate() {
            let role = if i % 2 == 0 { "worker" } else { "dispatcher" };
            let username = format!("{}_user", credential.label.replace('-', "_"));
            store.insert(&username, &credential.stored, role);
            store.users.push(SeededUser {
                username,
                password: credential.password,
                role,
                scheme: credential.label,
            });
        }
        store
    }

    /// Inserts a user row.
    pub fn insert(&self, username: &str, stored: &str, role: &str) {
        let conn = rusqlite::Connection::open(&self.path).expect("Failed to open user store");
        conn.execute(
            "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
            rusqlite::params![username, stored, role],
        )
        .expect("Failed to insert user");
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path as a connection spec.
    pub fn spec(&self) -> String {
        self.path.display().to_string()
    }

    /// Users written by [`seeded`](Self::seeded).
    pub fn users(&self) -> &[SeededUser] {
        &self.users
    }

    /// The seeded user with the given scheme label.
    pub fn user_with_scheme(&self, scheme: &str) -> Option<&SeededUser> {
        self.users.iter().find(|u| u.scheme == scheme)
    }
}
