//! The boundary between the harness and the database it drives.
//!
//! The harness never talks SQL dialects directly. A [ConnectionProvider] opens
//! [Session]s, and a session is both a [MigrationEngine] (applies changesets and
//! keeps the history table) and a [SchemaConnection] (raw statements and schema
//! metadata). Reference implementations exist for SQLite and PostgreSQL; any
//! other engine can be plugged in by implementing these traits.

use crate::changelog::Changelog;
use crate::error::Error;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;

/// Name of the history table kept by the reference engines.
pub const HISTORY_TABLE_NAME: &str = "databasechangelog";

/// Name of the engine lock table. Not created by the reference engines, but
/// reserved so that databases shared with other tooling are cleaned safely.
pub const LOCK_TABLE_NAME: &str = "databasechangeloglock";

/// Id allocation table that applications migrated alongside the history
/// table commonly keep. Its rows outlive every test.
pub const GLOBAL_UNIQUE_ID_TABLE: &str = "global_unique_id";

/// Bookkeeping tables that generic cleanup never touches. Matched case-insensitively.
pub const RESERVED_TABLES: &[&str] = &[HISTORY_TABLE_NAME, LOCK_TABLE_NAME, GLOBAL_UNIQUE_ID_TABLE];

/// A row of the engine's history table.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub author: Option<String>,
    /// Path of the changelog the changeset was applied from.
    pub changelog: String,
    pub executed_at: DateTime<Utc>,
    /// Monotonic execution order across all changelogs.
    pub order_executed: i64,
    pub checksum: String,
}

/// Changeset application and history bookkeeping.
pub trait MigrationEngine {
    /// Ids of the changesets of `changelog` not recorded as applied, in declaration order.
    fn unapplied_changesets(&mut self, changelog: &Changelog) -> Result<Vec<String>, Error>;

    /// Apply every unapplied changeset of `changelog`.
    fn apply_changelog(&mut self, changelog: &Changelog) -> Result<(), Error>;

    /// Apply the unapplied changesets of `changelog` up to and including the
    /// one at `index` of the unapplied list.
    fn apply_changelog_up_to(&mut self, changelog: &Changelog, index: usize) -> Result<(), Error>;

    /// Drop every object of `schema`, history included.
    fn drop_all_objects(&mut self, schema: &str) -> Result<(), Error>;

    /// Smallest execution order among history rows whose id is in `ids`.
    fn first_execution_order(&mut self, ids: &[String]) -> Result<Option<i64>, Error>;

    /// History rows with an execution order of at least `order`, newest first.
    fn history_since(&mut self, order: i64) -> Result<Vec<HistoryEntry>, Error>;

    /// Delete history rows with an execution order of at least `order`.
    /// Returns the number of rows removed.
    fn rewind_history(&mut self, order: i64) -> Result<u64, Error>;
}

/// Raw access to a live database connection.
pub trait SchemaConnection {
    /// Names of the ordinary tables of `schema`.
    fn table_names(&mut self, schema: &str) -> Result<Vec<String>, Error>;

    /// Column names of `table` in `schema`, in declaration order.
    fn column_names(&mut self, schema: &str, table: &str) -> Result<Vec<String>, Error>;

    /// Execute one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, Error>;

    /// Execute a batch of statements.
    fn execute_batch(&mut self, sql: &str) -> Result<(), Error>;

    /// Delete every row of `table`.
    fn delete_all_rows(&mut self, schema: &str, table: &str) -> Result<u64, Error>;

    fn is_autocommit(&self) -> bool;

    fn commit(&mut self) -> Result<(), Error>;

    /// The concrete session, for backend-specific assertions.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// One open session against a database target.
pub trait Session: MigrationEngine + SchemaConnection + Send {}

impl<T: MigrationEngine + SchemaConnection + Send> Session for T {}

/// Opens sessions against one database.
pub trait ConnectionProvider: Send + Sync {
    /// Open a session whose unqualified names resolve in `schema`.
    fn acquire(&self, schema: &str) -> Result<Box<dyn Session>, Error>;
}

/// A database a suite runs against: a connection provider plus a schema.
#[derive(Clone)]
pub struct TargetConfig {
    name: String,
    schema: String,
    provider: Arc<dyn ConnectionProvider>,
}

impl TargetConfig {
    pub fn new(
        name: impl Into<String>,
        schema: impl Into<String>,
        provider: impl ConnectionProvider + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            provider: Arc::new(provider),
        }
    }

    /// Display name, used in logs and reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Open a fresh session on this target.
    pub fn connect(&self) -> Result<Box<dyn Session>, Error> {
        self.provider.acquire(&self.schema)
    }
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Whether `table` is one of the engine's bookkeeping tables.
pub fn is_reserved_table(table: &str, extra: &[String]) -> bool {
    RESERVED_TABLES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(table))
        || extra.iter().any(|reserved| reserved.eq_ignore_ascii_case(table))
}
