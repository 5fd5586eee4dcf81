#![allow(dead_code)]

//! SQLite test infrastructure module.
//!
//! Sessions opened through a provider need a database file that outlives a
//! single connection, so each test gets its own temporary directory.

use crate::changelog::{Changelog, Changeset, MemoryLoader};
use crate::engine::TargetConfig;
use crate::sqlite::SqliteProvider;
use tempfile::TempDir;

/// A target on a fresh database file. Keep the directory alive for the test's duration.
pub fn temp_target(name: &str) -> (TempDir, TargetConfig) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let target = SqliteProvider::new(dir.path().join(format!("{}.db", name))).into_target(name);
    (dir, target)
}

/// A changelog from `(id, sql)` pairs.
pub fn changelog(path: &str, changesets: &[(&str, &str)]) -> Changelog {
    Changelog::new(
        path,
        changesets
            .iter()
            .map(|(id, sql)| Changeset::new(*id, *sql))
            .collect(),
    )
}

/// Two changelogs: `a.toml` with `c1`, `c2` and `b.toml` with `c3`.
///
/// Every changeset declares a rollback so that shared-isolation runs can replay them.
pub fn sample_loader() -> MemoryLoader {
    MemoryLoader::new()
        .with(
            "a.toml",
            r#"
            [[changeset]]
            id = "c1"
            sql = "CREATE TABLE accounts (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"
            rollback = "DROP TABLE accounts"

            [[changeset]]
            id = "c2"
            sql = "ALTER TABLE accounts ADD COLUMN email TEXT"
            rollback = "ALTER TABLE accounts DROP COLUMN email"
            "#,
        )
        .with(
            "b.toml",
            r#"
            [[changeset]]
            id = "c3"
            sql = "CREATE TABLE orders (id INTEGER PRIMARY KEY, account_id INTEGER NOT NULL REFERENCES accounts(id))"
            rollback = "DROP TABLE orders"
            "#,
        )
}
