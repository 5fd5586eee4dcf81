#![cfg_attr(docsrs, feature(doc_cfg))]
//! `migratest` is a harness for testing database schema migrations one changeset at a time.
//!
//! Core concepts:
//! - A migration is an ordered series of *changesets* (atomic, uniquely identified steps) grouped into ordered *changelogs* (files).
//! - A migration test names the changesets it is about. Before its body runs, the harness applies everything that precedes them, and the named changesets themselves, and nothing after.
//! - After the body, the harness rolls back what the test produced, so the next test starts from a known state.
//!
//! # Motivation
//!
//! ## Testing a migration at the moment it runs
//!
//! A migration that moves data between columns is only interesting on a database that looks exactly like production did right before it ran.
//! Writing that test by hand means tracking how many prior changesets must run first, and keeping that number right as new changesets are added.
//! `migratest` derives it from the changelogs: a test says "`add-email`", and gets a database with `add-email` freshly applied on top of everything that came before it.
//!
//! ## Ordered suites
//!
//! A [MigrationSuite] runs its tests in global changeset order on a shared database, rolling back each test's own changesets after it.
//! The schema grows one test at a time, the way it grows in production, and a whole suite can run against several databases.
//!
//! # Example
//!
//! ```
//! use migratest::{HarnessConfig, MemoryLoader, MigrationSuite, MigrationTest};
//! use migratest::sqlite::SqliteProvider;
//!
//! let changelogs = MemoryLoader::new().with(
//!     "001-accounts.toml",
//!     r#"
//!     [[changeset]]
//!     id = "create-accounts"
//!     sql = "CREATE TABLE accounts (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"
//!     rollback = "DROP TABLE accounts"
//!
//!     [[changeset]]
//!     id = "add-email"
//!     sql = "ALTER TABLE accounts ADD COLUMN email TEXT"
//!     rollback = "ALTER TABLE accounts DROP COLUMN email"
//!     "#,
//! );
//!
//! let dir = tempfile::tempdir().unwrap();
//! let suite = MigrationSuite::builder()
//!     .loader(changelogs)
//!     .changelog("001-accounts.toml")
//!     .target(SqliteProvider::new(dir.path().join("test.db")).into_target("sqlite"))
//!     .test(
//!         MigrationTest::new("email")
//!             .changeset("add-email")
//!             .case("column exists", |ctx| ctx.assert_column_exists("accounts", "email")),
//!     )
//!     .config(HarnessConfig::default())
//!     .build()
//!     .unwrap();
//!
//! suite.run().unwrap().assert_success();
//! ```
//!
//! # Features
//! - Changelogs in TOML or JSON, loaded from the filesystem or from memory.
//! - Rollback SQL executed when a test's changesets are rewound.
//! - Checksums recorded in the history table, so edited changesets are detected.
//! - Parallel execution across database targets.
//! - Tracing integration - available with the `tracing` feature flag.
//!
//! # Database support
//!
//! The harness drives databases through the [engine] traits. Reference engines:
//!
//! - [`SQLite`](sqlite) - available with the `sqlite` feature flag.
//! - [`PostgreSQL`](postgres) - available with the `postgres` feature flag.

pub mod changelog;
pub use changelog::{Changelog, Changeset, FileSystemLoader, MemoryLoader, ResourceLoader};

pub mod config;
pub use config::HarnessConfig;

mod context;
pub use context::MigrationContext;

pub mod driver;
pub use driver::{DriverState, MigrationHandle, MigrationPlan, PreparedMigration};

pub mod engine;
pub use engine::{ConnectionProvider, MigrationEngine, SchemaConnection, Session, TargetConfig};

mod error;
pub use error::Error;

pub mod index;
pub use index::ChangesetIndex;

pub mod isolation;
pub use isolation::IsolationLevel;

mod suite;
pub use suite::{CaseBody, CaseOutcome, MigrationSuite, MigrationSuiteBuilder, MigrationTest, SuiteReport};

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

#[cfg(all(test, feature = "sqlite"))]
pub(crate) mod test_sqlite;

#[cfg(all(test, feature = "postgres"))]
pub(crate) mod test_postgres;
