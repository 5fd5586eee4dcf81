//! # SQLite support
//!
//! A reference [MigrationEngine] for SQLite built on the [`rusqlite`](https://crates.io/crates/rusqlite) crate.
//!
//! Each changeset runs in its own transaction together with the insert of its
//! history row, so a failing changeset leaves neither schema changes nor
//! bookkeeping behind. Sessions enable `PRAGMA foreign_keys`, which makes the
//! isolation cleanup deal with referential-integrity ordering the same way it
//! would on a server database.
//!
//! SQLite has no schemas in the server sense; the schema of a target is the
//! name of an attached database, `main` for the primary one.
//!
//! ## Example
//!
//! ```
//! use migratest::{Changelog, Changeset};
//! use migratest::engine::MigrationEngine;
//! use migratest::sqlite::SqliteSession;
//!
//! let changelog = Changelog::new("users.toml", vec![
//!     Changeset::new("create-users", "CREATE TABLE users (id INTEGER PRIMARY KEY)"),
//!     Changeset::new("add-email", "ALTER TABLE users ADD COLUMN email TEXT"),
//! ]);
//!
//! let mut session = SqliteSession::open_in_memory().unwrap();
//! session.apply_changelog_up_to(&changelog, 0).unwrap();
//! assert_eq!(session.unapplied_changesets(&changelog).unwrap(), vec!["add-email"]);
//! ```

use crate::changelog::{Changelog, Changeset};
use crate::engine::{
    ConnectionProvider, HistoryEntry, MigrationEngine, SchemaConnection, Session, TargetConfig,
    HISTORY_TABLE_NAME,
};
use crate::error::Error;
use chrono::Utc;
use rusqlite::types::FromSql;
use rusqlite::{params, params_from_iter, Connection};
use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
#[cfg(feature = "tracing")]
use std::time::Instant;

/// The schema name of the primary SQLite database.
pub const MAIN_SCHEMA: &str = "main";

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Opens [SqliteSession]s on a database file.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(30),
        }
    }

    /// Set how long a session waits for locks held by other connections.
    /// Defaults to 30 seconds.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// A target on the primary database of this file.
    pub fn into_target(self, name: impl Into<String>) -> TargetConfig {
        TargetConfig::new(name, MAIN_SCHEMA, self)
    }
}

impl ConnectionProvider for SqliteProvider {
    fn acquire(&self, schema: &str) -> Result<Box<dyn Session>, Error> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(Box::new(SqliteSession::new(conn, schema)?))
    }
}

/// A live SQLite connection acting as migration engine.
pub struct SqliteSession {
    conn: Connection,
    schema: String,
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("schema", &self.schema)
            .finish()
    }
}

impl SqliteSession {
    /// Wrap an open connection. Changesets and history live in `schema`.
    pub fn new(conn: Connection, schema: impl Into<String>) -> Result<Self, Error> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn,
            schema: schema.into(),
        })
    }

    /// A session on a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::new(Connection::open_in_memory()?, MAIN_SCHEMA)
    }

    /// The underlying connection, for assertions the harness does not cover.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Query a single value.
    pub fn query_one<T: FromSql>(&mut self, sql: &str) -> Result<T, Error> {
        Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
    }

    /// Query all values of a single-column result.
    pub fn query_all<T: FromSql>(&mut self, sql: &str) -> Result<Vec<T>, Error> {
        let mut stmt = self.conn.prepare(sql)?;
        let values = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<T>, _>>()?;
        Ok(values)
    }

    fn history_table(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), HISTORY_TABLE_NAME)
    }

    fn history_table_exists(&self) -> Result<bool, Error> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
                quote_ident(&self.schema)
            ),
            [HISTORY_TABLE_NAME],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn ensure_history_table(&self) -> Result<(), Error> {
        // IF NOT EXISTS covers sessions racing on the same file
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT NOT NULL,
                    author TEXT,
                    filename TEXT NOT NULL,
                    dateexecuted TEXT NOT NULL,
                    orderexecuted INTEGER NOT NULL,
                    checksum TEXT NOT NULL,
                    PRIMARY KEY (id, filename)
                )",
                self.history_table()
            ),
            [],
        )?;
        Ok(())
    }

    /// Checksums of the applied changesets of `changelog`, by id.
    fn applied_checksums(&self, changelog: &Changelog) -> Result<HashMap<String, String>, Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, checksum FROM {} WHERE filename = ?1",
            self.history_table()
        ))?;
        let rows = stmt
            .query_map([changelog.path()], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, String>, _>>()?;
        Ok(rows)
    }

    fn apply_changeset(&mut self, changelog: &Changelog, changeset: &Changeset) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "sqlite_changeset",
            id = %changeset.id,
            changelog = %changelog.path()
        )
        .entered();

        #[cfg(feature = "tracing")]
        tracing::info!("Applying changeset");
        #[cfg(feature = "tracing")]
        let started = Instant::now();

        let history_table = self.history_table();
        let tx = self.conn.transaction()?;
        let order: i64 = tx.query_row(
            &format!("SELECT COALESCE(MAX(orderexecuted), 0) + 1 FROM {}", history_table),
            [],
            |row| row.get(0),
        )?;

        let result = tx.execute_batch(&changeset.sql).and_then(|_| {
            tx.execute(
                &format!(
                    "INSERT INTO {} (id, author, filename, dateexecuted, orderexecuted, checksum)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    history_table
                ),
                params![
                    changeset.id,
                    changeset.author,
                    changelog.path(),
                    Utc::now().to_rfc3339(),
                    order,
                    changeset.checksum()
                ],
            )
        });

        match result {
            Ok(_) => {
                tx.commit()?;
                #[cfg(feature = "tracing")]
                tracing::info!(
                    order_executed = order,
                    duration_ms = started.elapsed().as_millis(),
                    "Changeset applied"
                );
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Changeset failed");
                // dropping the transaction rolls it back
                Err(e.into())
            }
        }
    }
}

impl MigrationEngine for SqliteSession {
    fn unapplied_changesets(&mut self, changelog: &Changelog) -> Result<Vec<String>, Error> {
        self.ensure_history_table()?;
        let applied = self.applied_checksums(changelog)?;

        let mut unapplied = Vec::new();
        for changeset in changelog.changesets() {
            match applied.get(&changeset.id) {
                Some(recorded) => {
                    let current = changeset.checksum();
                    if *recorded != current {
                        return Err(Error::ChecksumMismatch {
                            id: changeset.id.clone(),
                            changelog: changelog.path().to_string(),
                            expected: recorded.clone(),
                            found: current,
                        });
                    }
                }
                None => unapplied.push(changeset.id.clone()),
            }
        }
        Ok(unapplied)
    }

    fn apply_changelog(&mut self, changelog: &Changelog) -> Result<(), Error> {
        let pending = self.unapplied_changesets(changelog)?;
        if pending.is_empty() {
            return Ok(());
        }
        self.apply_changelog_up_to(changelog, pending.len() - 1)
    }

    fn apply_changelog_up_to(&mut self, changelog: &Changelog, index: usize) -> Result<(), Error> {
        let pending = self.unapplied_changesets(changelog)?;
        if index >= pending.len() {
            return Err(Error::Generic(format!(
                "Changelog '{}' has {} pending changesets, cannot apply through index {}",
                changelog.path(),
                pending.len(),
                index
            )));
        }

        for id in &pending[..=index] {
            let changeset = changelog
                .changesets()
                .iter()
                .find(|c| &c.id == id)
                .ok_or_else(|| Error::UnresolvedChangeset(id.clone()))?;
            self.apply_changeset(changelog, changeset)?;
        }
        Ok(())
    }

    fn drop_all_objects(&mut self, schema: &str) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::info!(schema = %schema, "Dropping all database objects");

        let objects: Vec<(String, String)> = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT type, name FROM {}.sqlite_master
                 WHERE type IN ('trigger', 'view', 'table') AND name NOT LIKE 'sqlite_%'
                 ORDER BY CASE type WHEN 'trigger' THEN 0 WHEN 'view' THEN 1 ELSE 2 END, name",
                quote_ident(schema)
            ))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        // foreign keys would otherwise dictate the drop order
        self.conn.pragma_update(None, "foreign_keys", false)?;
        let dropped = objects.iter().try_for_each(|(kind, name)| {
            self.conn
                .execute_batch(&format!(
                    "DROP {} IF EXISTS {}.{}",
                    kind.to_uppercase(),
                    quote_ident(schema),
                    quote_ident(name)
                ))
        });
        self.conn.pragma_update(None, "foreign_keys", true)?;
        dropped?;
        Ok(())
    }

    fn first_execution_order(&mut self, ids: &[String]) -> Result<Option<i64>, Error> {
        if ids.is_empty() || !self.history_table_exists()? {
            return Ok(None);
        }
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let first: Option<i64> = self.conn.query_row(
            &format!(
                "SELECT MIN(orderexecuted) FROM {} WHERE id IN ({})",
                self.history_table(),
                placeholders
            ),
            params_from_iter(ids.iter()),
            |row| row.get(0),
        )?;
        Ok(first)
    }

    fn history_since(&mut self, order: i64) -> Result<Vec<HistoryEntry>, Error> {
        if !self.history_table_exists()? {
            return Ok(vec![]);
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, author, filename, dateexecuted, orderexecuted, checksum FROM {}
             WHERE orderexecuted >= ?1 ORDER BY orderexecuted DESC",
            self.history_table()
        ))?;
        let rows: Vec<(String, Option<String>, String, String, i64, String)> = stmt
            .query_map([order], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, author, changelog, executed_at, order_executed, checksum)| {
                let executed_at = chrono::DateTime::parse_from_rfc3339(&executed_at)
                    .map_err(|e| Error::Generic(format!("Failed to parse datetime: {}", e)))?
                    .with_timezone(&Utc);
                Ok(HistoryEntry {
                    id,
                    author,
                    changelog,
                    executed_at,
                    order_executed,
                    checksum,
                })
            })
            .collect()
    }

    fn rewind_history(&mut self, order: i64) -> Result<u64, Error> {
        if !self.history_table_exists()? {
            return Ok(0);
        }
        let removed = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE orderexecuted >= ?1",
                self.history_table()
            ),
            [order],
        )?;
        Ok(removed as u64)
    }
}

impl SchemaConnection for SqliteSession {
    fn table_names(&mut self, schema: &str) -> Result<Vec<String>, Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT name FROM {}.sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(schema)
        ))?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn column_names(&mut self, schema: &str, table: &str) -> Result<Vec<String>, Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1, ?2) ORDER BY cid")?;
        let names = stmt
            .query_map([table, schema], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn execute(&mut self, sql: &str) -> Result<u64, Error> {
        Ok(self.conn.execute(sql, [])? as u64)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn delete_all_rows(&mut self, schema: &str, table: &str) -> Result<u64, Error> {
        let removed = self.conn.execute(
            &format!("DELETE FROM {}.{}", quote_ident(schema), quote_ident(table)),
            [],
        )?;
        Ok(removed as u64)
    }

    fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    fn commit(&mut self) -> Result<(), Error> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_sqlite::{changelog, temp_target};

    fn users_changelog() -> Changelog {
        Changelog::new(
            "users.toml",
            vec![
                Changeset::new("create-users", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
                    .with_author("alice"),
                Changeset::new("add-email", "ALTER TABLE users ADD COLUMN email TEXT"),
                Changeset::new(
                    "create-posts",
                    "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id));
                     CREATE INDEX idx_posts_user ON posts(user_id);",
                ),
            ],
        )
    }

    #[test]
    fn unapplied_on_clean_database_lists_everything() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        let pending = session.unapplied_changesets(&users_changelog()).unwrap();
        assert_eq!(pending, vec!["create-users", "add-email", "create-posts"]);
        // listing creates the history table, nothing else
        assert_eq!(
            session.table_names(MAIN_SCHEMA).unwrap(),
            vec![HISTORY_TABLE_NAME]
        );
    }

    #[test]
    fn apply_up_to_includes_the_index() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        let changelog = users_changelog();

        session.apply_changelog_up_to(&changelog, 1).unwrap();
        assert_eq!(
            session.column_names(MAIN_SCHEMA, "users").unwrap(),
            vec!["id", "name", "email"]
        );
        assert_eq!(
            session.unapplied_changesets(&changelog).unwrap(),
            vec!["create-posts"]
        );

        // the index is relative to the pending list
        session.apply_changelog_up_to(&changelog, 0).unwrap();
        assert!(session.unapplied_changesets(&changelog).unwrap().is_empty());
    }

    #[test]
    fn apply_up_to_rejects_out_of_range_index() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        let result = session.apply_changelog_up_to(&users_changelog(), 3);
        assert!(matches!(result, Err(Error::Generic(ref msg)) if msg.contains("3 pending changesets")));
        assert_eq!(session.table_names(MAIN_SCHEMA).unwrap(), vec![HISTORY_TABLE_NAME]);
    }

    #[test]
    fn apply_changelog_is_idempotent() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        let changelog = users_changelog();
        session.apply_changelog(&changelog).unwrap();
        session.apply_changelog(&changelog).unwrap();
        let tables = session.table_names(MAIN_SCHEMA).unwrap();
        assert_eq!(tables, vec![HISTORY_TABLE_NAME, "posts", "users"]);
        let orders: Vec<i64> = session
            .query_all("SELECT orderexecuted FROM databasechangelog ORDER BY orderexecuted")
            .unwrap();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn failing_changeset_rolls_back_and_records_nothing() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        let changelog = changelog(
            "broken.toml",
            &[
                ("ok", "CREATE TABLE ok (id INTEGER)"),
                ("broken", "CREATE TABLE half (id INTEGER); THIS IS NOT SQL"),
            ],
        );

        let result = session.apply_changelog(&changelog);
        assert!(matches!(result, Err(Error::Rusqlite(_))));
        assert_eq!(
            session.table_names(MAIN_SCHEMA).unwrap(),
            vec![HISTORY_TABLE_NAME, "ok"]
        );
        assert_eq!(
            session.unapplied_changesets(&changelog).unwrap(),
            vec!["broken"]
        );
    }

    #[test]
    fn history_records_changelog_author_and_order() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        let changelog = users_changelog();
        session.apply_changelog(&changelog).unwrap();

        let history = session.history_since(2).unwrap();
        let ids: Vec<_> = history.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["create-posts", "add-email"]);
        assert!(history.iter().all(|h| h.changelog == "users.toml"));

        let all = session.history_since(0).unwrap();
        let first = all.last().unwrap();
        assert_eq!(first.id, "create-users");
        assert_eq!(first.author.as_deref(), Some("alice"));
        assert_eq!(first.order_executed, 1);
        assert_eq!(first.checksum, changelog.changesets()[0].checksum());
        let diff = Utc::now().timestamp() - first.executed_at.timestamp();
        assert!(diff < 5);
    }

    #[test]
    fn modified_changeset_is_detected() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        session.apply_changelog(&users_changelog()).unwrap();

        let modified = Changelog::new(
            "users.toml",
            vec![Changeset::new(
                "create-users",
                "CREATE TABLE users (id INTEGER PRIMARY KEY)",
            )
            .with_author("alice")],
        );
        let err = session.unapplied_changesets(&modified).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { ref id, .. } if id == "create-users"));
    }

    #[test]
    fn same_id_in_another_changelog_file_is_tracked_separately() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        let one = changelog("one.toml", &[("shared", "CREATE TABLE one (id INTEGER)")]);
        let two = changelog("two.toml", &[("shared", "CREATE TABLE two (id INTEGER)")]);
        session.apply_changelog(&one).unwrap();
        assert_eq!(session.unapplied_changesets(&two).unwrap(), vec!["shared"]);
    }

    #[test]
    fn first_execution_order_and_rewind() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        assert_eq!(
            session.first_execution_order(&["add-email".to_string()]).unwrap(),
            None
        );
        assert_eq!(session.rewind_history(1).unwrap(), 0);
        assert!(session.history_since(1).unwrap().is_empty());

        let changelog = users_changelog();
        session.apply_changelog(&changelog).unwrap();

        let ids = vec!["create-posts".to_string(), "add-email".to_string()];
        assert_eq!(session.first_execution_order(&ids).unwrap(), Some(2));
        assert_eq!(
            session.first_execution_order(&["unknown".to_string()]).unwrap(),
            None
        );
        assert_eq!(session.first_execution_order(&[]).unwrap(), None);

        assert_eq!(session.rewind_history(2).unwrap(), 2);
        assert_eq!(
            session.unapplied_changesets(&changelog).unwrap(),
            vec!["add-email", "create-posts"]
        );
    }

    #[test]
    fn drop_all_objects_clears_schema_despite_foreign_keys() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        session.apply_changelog(&users_changelog()).unwrap();
        session
            .execute_batch(
                "INSERT INTO users (id, name) VALUES (1, 'alice');
                 INSERT INTO posts (id, user_id) VALUES (1, 1);
                 CREATE VIEW user_posts AS SELECT * FROM posts;
                 CREATE TRIGGER no_op AFTER INSERT ON users BEGIN SELECT 1; END;",
            )
            .unwrap();

        session.drop_all_objects(MAIN_SCHEMA).unwrap();

        assert!(session.table_names(MAIN_SCHEMA).unwrap().is_empty());
        let remaining: i64 = session
            .query_one("SELECT COUNT(*) FROM sqlite_master WHERE name NOT LIKE 'sqlite_%'")
            .unwrap();
        assert_eq!(remaining, 0);
        // foreign keys are enforced again afterwards
        let fk: i64 = session.query_one("PRAGMA foreign_keys").unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn delete_all_rows_respects_foreign_keys() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        session.apply_changelog(&users_changelog()).unwrap();
        session
            .execute_batch(
                "INSERT INTO users (id, name) VALUES (1, 'alice');
                 INSERT INTO posts (id, user_id) VALUES (1, 1);",
            )
            .unwrap();

        assert!(session.delete_all_rows(MAIN_SCHEMA, "users").is_err());
        assert_eq!(session.delete_all_rows(MAIN_SCHEMA, "posts").unwrap(), 1);
        assert_eq!(session.delete_all_rows(MAIN_SCHEMA, "users").unwrap(), 1);
    }

    #[test]
    fn commit_ends_open_transaction() {
        let mut session = SqliteSession::open_in_memory().unwrap();
        assert!(session.is_autocommit());
        session.execute_batch("BEGIN; CREATE TABLE t (id INTEGER);").unwrap();
        assert!(!session.is_autocommit());
        session.commit().unwrap();
        assert!(session.is_autocommit());
        session.commit().unwrap();
    }

    #[test]
    fn provider_sessions_share_the_database_file() {
        let (_dir, target) = temp_target("shared");
        let changelog = users_changelog();

        let mut first = target.connect().unwrap();
        first.apply_changelog_up_to(&changelog, 0).unwrap();
        drop(first);

        let mut second = target.connect().unwrap();
        assert_eq!(
            second.unapplied_changesets(&changelog).unwrap(),
            vec!["add-email", "create-posts"]
        );
        let session = second
            .as_any_mut()
            .downcast_mut::<SqliteSession>()
            .unwrap();
        let fk: i64 = session.query_one("PRAGMA foreign_keys").unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    #[cfg(feature = "tracing")]
    fn tracing_logs_applied_changeset() {
        use tracing_test::traced_test;

        #[traced_test]
        fn run_test() {
            let mut session = SqliteSession::open_in_memory().unwrap();
            session.apply_changelog(&users_changelog()).unwrap();
            assert!(logs_contain("Applying changeset"));
            assert!(logs_contain("Changeset applied"));
            assert!(logs_contain("duration_ms"));
        }

        run_test();
    }
}
