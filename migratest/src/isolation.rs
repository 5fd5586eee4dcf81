//! Keeping migration tests from seeing each other's database state.
//!
//! Two mechanisms, combined per [IsolationLevel]:
//!
//! - [tear_down] drops every object of a target schema.
//! - [cleanup] undoes a single test: it rewinds the history rows the test
//!   produced (running their rollback SQL when declared) and empties every data
//!   table, retrying to get past foreign keys.
//! - [clear_data] only empties the data tables. It runs between the cases of
//!   one test, which share that test's setup.
//!
//! [guard] ties a test body to its cleanup so that cleanup always runs.

use crate::config::HarnessConfig;
use crate::engine::{is_reserved_table, Session, TargetConfig};
use crate::error::Error;
use crate::index::ChangesetIndex;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// How many times cleanup retries the tables it could not empty.
pub const CLEANUP_PASSES: usize = 5;

/// How much state a run shares between tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IsolationLevel {
    /// Full tear-down before a test's setup and after its execution.
    Isolated,
    /// No tear-down; only the per-test cleanup. Tests build on one another in
    /// changeset order.
    Shared,
}

/// What a [cleanup] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Cleanup was disabled by `skip_delete`.
    pub skipped: bool,
    /// History rows removed.
    pub rewound: u64,
    /// Changesets whose rollback SQL was executed, newest first.
    pub rolled_back: Vec<String>,
    /// Tables still not empty once the retry budget was spent.
    pub remaining_tables: Vec<String>,
}

/// Drop every object of the target's schema, unless `skip_delete` is set.
pub fn tear_down(target: &TargetConfig, config: &HarnessConfig) -> Result<(), Error> {
    if config.skip_delete {
        #[cfg(feature = "tracing")]
        tracing::debug!(target_name = %target.name(), "Skipping tear-down");
        return Ok(());
    }

    #[cfg(feature = "tracing")]
    tracing::info!(target_name = %target.name(), schema = %target.schema(), "Tearing down target");

    let mut session = target.connect()?;
    session.drop_all_objects(target.schema())?;
    if !session.is_autocommit() {
        session.commit()?;
    }
    Ok(())
}

/// Undo what a test naming `ids` left in `schema`.
///
/// History rows from the first execution of any of `ids` onwards are removed,
/// after executing their rollback SQL, newest first, when `run_rollbacks` is
/// set. Then every data table is emptied as in [clear_data].
///
/// A failing rollback stops the remaining rollbacks but not the rewind or the
/// table emptying; its error is returned once both are done.
pub fn cleanup(
    session: &mut dyn Session,
    index: &ChangesetIndex,
    ids: &[String],
    schema: &str,
    config: &HarnessConfig,
) -> Result<CleanupReport, Error> {
    let mut report = CleanupReport::default();
    if config.skip_delete {
        report.skipped = true;
        return Ok(report);
    }

    let mut rollback_error = None;
    if let Some(first) = session.first_execution_order(ids)?.filter(|order| *order > 0) {
        if config.run_rollbacks {
            for entry in session.history_since(first)? {
                let rollback = index
                    .changeset(&entry.id)
                    .filter(|_| index.resource_of(&entry.id) == Some(entry.changelog.as_str()))
                    .and_then(|changeset| changeset.rollback.clone());
                let Some(sql) = rollback else { continue };

                #[cfg(feature = "tracing")]
                tracing::debug!(id = %entry.id, "Rolling back changeset");
                if let Err(e) = session.execute_batch(&sql) {
                    #[cfg(feature = "tracing")]
                    tracing::error!(id = %entry.id, error = %e, "Rollback failed");
                    rollback_error = Some(e);
                    break;
                }
                report.rolled_back.push(entry.id);
            }
        }
        report.rewound = session.rewind_history(first)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(from_order = first, rewound = report.rewound, "Rewound history");
    }

    report.remaining_tables = empty_tables(session, schema, config)?;
    match rollback_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

/// Empty every data table of `schema`, leaving history and schema alone.
///
/// The engine's bookkeeping tables and `extra_reserved_tables` are kept.
/// Deletes that fail are retried for up to [CLEANUP_PASSES] passes; tables
/// that still cannot be emptied are logged and reported, not returned as an
/// error.
pub fn clear_data(
    session: &mut dyn Session,
    schema: &str,
    config: &HarnessConfig,
) -> Result<CleanupReport, Error> {
    let mut report = CleanupReport::default();
    if config.skip_delete {
        report.skipped = true;
        return Ok(report);
    }
    report.remaining_tables = empty_tables(session, schema, config)?;
    Ok(report)
}

fn empty_tables(
    session: &mut dyn Session,
    schema: &str,
    config: &HarnessConfig,
) -> Result<Vec<String>, Error> {
    let mut remaining: Vec<String> = session
        .table_names(schema)?
        .into_iter()
        .filter(|table| !is_reserved_table(table, &config.extra_reserved_tables))
        .collect();

    for _pass in 0..CLEANUP_PASSES {
        if remaining.is_empty() {
            break;
        }
        let mut failed = Vec::new();
        for table in remaining {
            if let Err(_e) = session.delete_all_rows(schema, &table) {
                #[cfg(feature = "tracing")]
                tracing::debug!(table = %table, pass = _pass, error = %_e, "Delete failed, will retry");
                failed.push(table);
            }
        }
        if !session.is_autocommit() {
            session.commit()?;
        }
        remaining = failed;
    }

    if !remaining.is_empty() {
        #[cfg(feature = "tracing")]
        tracing::error!(tables = ?remaining, "Unable to clean up the database");
    }
    Ok(remaining)
}

/// Run `body`, then `cleanup`, on the same state.
///
/// Cleanup runs even when the body fails or panics. A body failure wins: a
/// cleanup error after it is only logged. After a passing body, a cleanup
/// error is the result.
pub fn guard<T, B, C>(state: &mut T, body: B, cleanup: C) -> Result<(), Error>
where
    B: FnOnce(&mut T) -> Result<(), Error>,
    C: FnOnce(&mut T) -> Result<(), Error>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut *state))).unwrap_or_else(
        |payload| {
            Err(Error::TestFailed(format!(
                "Test body panicked: {}",
                panic_message(payload.as_ref())
            )))
        },
    );

    let cleaned = cleanup(state);
    match (outcome, cleaned) {
        (Ok(()), cleaned) => cleaned,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(_cleanup_error)) => {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_cleanup_error, "Cleanup failed after a failing test");
            Err(e)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::changelog::MemoryLoader;
    use crate::engine::{MigrationEngine, SchemaConnection};
    use crate::sqlite::{SqliteSession, MAIN_SCHEMA};
    use crate::test_sqlite::{sample_loader, temp_target};

    fn sample_index() -> ChangesetIndex {
        ChangesetIndex::build(&sample_loader(), &["a.toml", "b.toml"]).unwrap()
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn count(session: &mut SqliteSession, table: &str) -> i64 {
        session
            .query_one(&format!("SELECT COUNT(*) FROM {}", table))
            .unwrap()
    }

    fn applied_session(index: &ChangesetIndex) -> SqliteSession {
        let mut session = SqliteSession::open_in_memory().unwrap();
        for changelog in index.changelogs() {
            session.apply_changelog(changelog).unwrap();
        }
        session
    }

    #[test]
    fn cleanup_rewinds_from_first_execution_and_runs_rollbacks() {
        let index = sample_index();
        let mut session = applied_session(&index);

        let report = cleanup(&mut session, &index, &ids(&["c2"]), MAIN_SCHEMA, &HarnessConfig::default())
            .unwrap();
        assert_eq!(report.rewound, 2);
        assert_eq!(report.rolled_back, vec!["c3", "c2"]);
        assert!(report.remaining_tables.is_empty());

        assert_eq!(session.table_names(MAIN_SCHEMA).unwrap(), vec!["accounts", "databasechangelog"]);
        assert_eq!(session.column_names(MAIN_SCHEMA, "accounts").unwrap(), vec!["id", "name"]);
        let remaining: Vec<String> = session.query_all("SELECT id FROM databasechangelog").unwrap();
        assert_eq!(remaining, vec!["c1"]);
    }

    #[test]
    fn cleanup_without_rollbacks_keeps_the_schema() {
        let index = sample_index();
        let mut session = applied_session(&index);
        let config = HarnessConfig::default().with_run_rollbacks(false);

        let report = cleanup(&mut session, &index, &ids(&["c3"]), MAIN_SCHEMA, &config).unwrap();
        assert_eq!(report.rewound, 1);
        assert!(report.rolled_back.is_empty());
        assert_eq!(
            session.table_names(MAIN_SCHEMA).unwrap(),
            vec!["accounts", "databasechangelog", "orders"]
        );
    }

    #[test]
    fn cleanup_retries_deletes_blocked_by_foreign_keys() {
        let index = sample_index();
        let mut session = applied_session(&index);
        session
            .execute_batch(
                "INSERT INTO accounts (id, name) VALUES (1, 'alice'), (2, 'bob');
                 INSERT INTO orders (id, account_id) VALUES (1, 1), (2, 2);",
            )
            .unwrap();

        // accounts sorts before orders, so the first pass cannot empty it
        let config = HarnessConfig::default().with_run_rollbacks(false);
        let report = cleanup(&mut session, &index, &ids(&["unrelated"]), MAIN_SCHEMA, &config).unwrap();
        assert_eq!(report.rewound, 0);
        assert!(report.remaining_tables.is_empty());
        assert_eq!(count(&mut session, "accounts"), 0);
        assert_eq!(count(&mut session, "orders"), 0);
        // history is untouched when nothing of the test was applied
        assert_eq!(count(&mut session, "databasechangelog"), 3);
    }

    #[test]
    fn cleanup_keeps_reserved_tables() {
        let index = sample_index();
        let mut session = applied_session(&index);
        session
            .execute_batch(
                "CREATE TABLE GLOBAL_UNIQUE_ID (next_id INTEGER);
                 INSERT INTO GLOBAL_UNIQUE_ID VALUES (42);
                 CREATE TABLE app_settings (name TEXT);
                 INSERT INTO app_settings VALUES ('theme');
                 INSERT INTO accounts (id, name) VALUES (1, 'alice');",
            )
            .unwrap();

        let config = HarnessConfig::default()
            .with_run_rollbacks(false)
            .with_reserved_table("APP_SETTINGS");
        cleanup(&mut session, &index, &ids(&["c3"]), MAIN_SCHEMA, &config).unwrap();
        assert_eq!(count(&mut session, "GLOBAL_UNIQUE_ID"), 1);
        assert_eq!(count(&mut session, "app_settings"), 1);
        assert_eq!(count(&mut session, "accounts"), 0);
    }

    #[test]
    fn failed_rollback_still_rewinds_and_empties_tables() {
        let loader = MemoryLoader::new().with(
            "a.toml",
            r#"
            [[changeset]]
            id = "c1"
            sql = "CREATE TABLE accounts (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"
            rollback = "DROP TABLE no_such_table"

            [[changeset]]
            id = "c2"
            sql = "CREATE TABLE notes (id INTEGER PRIMARY KEY)"
            rollback = "DROP TABLE notes"
            "#,
        );
        let index = ChangesetIndex::build(&loader, &["a.toml"]).unwrap();
        let mut session = applied_session(&index);
        session
            .execute_batch("INSERT INTO accounts (id, name) VALUES (1, 'alice')")
            .unwrap();

        let result = cleanup(&mut session, &index, &ids(&["c1"]), MAIN_SCHEMA, &HarnessConfig::default());
        let error = result.unwrap_err();
        assert!(error.to_string().contains("no_such_table"), "{}", error);

        // the newer rollback ran, the history is rewound and the rows are gone
        assert_eq!(
            session.table_names(MAIN_SCHEMA).unwrap(),
            vec!["accounts", "databasechangelog"]
        );
        assert_eq!(count(&mut session, "databasechangelog"), 0);
        assert_eq!(count(&mut session, "accounts"), 0);
        assert_eq!(
            session
                .unapplied_changesets(index.changelog("a.toml").unwrap())
                .unwrap(),
            vec!["c1", "c2"]
        );
    }

    #[test]
    fn clear_data_leaves_history_and_schema() {
        let index = sample_index();
        let mut session = applied_session(&index);
        session
            .execute_batch(
                "INSERT INTO accounts (id, name) VALUES (1, 'alice');
                 INSERT INTO orders (id, account_id) VALUES (1, 1);",
            )
            .unwrap();

        let report = clear_data(&mut session, MAIN_SCHEMA, &HarnessConfig::default()).unwrap();
        assert_eq!(report.rewound, 0);
        assert!(report.rolled_back.is_empty());
        assert!(report.remaining_tables.is_empty());
        assert_eq!(count(&mut session, "accounts"), 0);
        assert_eq!(count(&mut session, "orders"), 0);
        assert_eq!(count(&mut session, "databasechangelog"), 3);

        session
            .execute_batch("INSERT INTO accounts (id, name) VALUES (1, 'alice')")
            .unwrap();
        let config = HarnessConfig::default().with_skip_delete(true);
        assert!(clear_data(&mut session, MAIN_SCHEMA, &config).unwrap().skipped);
        assert_eq!(count(&mut session, "accounts"), 1);
    }

    #[test]
    fn cleanup_reports_tables_it_cannot_empty() {
        use tracing_test::traced_test;

        #[traced_test]
        fn run_test() {
            let index = sample_index();
            let mut session = applied_session(&index);
            session
                .execute_batch(
                    "CREATE TABLE locked (id INTEGER);
                     INSERT INTO locked VALUES (1);
                     CREATE TRIGGER keep_rows BEFORE DELETE ON locked
                     BEGIN SELECT RAISE(ABORT, 'rows are locked'); END;",
                )
                .unwrap();

            let config = HarnessConfig::default().with_run_rollbacks(false);
            let report = cleanup(&mut session, &index, &ids(&["c3"]), MAIN_SCHEMA, &config).unwrap();
            assert_eq!(report.remaining_tables, vec!["locked"]);
            assert_eq!(count(&mut session, "locked"), 1);
            #[cfg(feature = "tracing")]
            assert!(logs_contain("Unable to clean up the database"));
        }

        run_test();
    }

    #[test]
    fn skip_delete_disables_cleanup_and_tear_down() {
        let index = sample_index();
        let mut session = applied_session(&index);
        session
            .execute_batch("INSERT INTO accounts (id, name) VALUES (1, 'alice')")
            .unwrap();
        let config = HarnessConfig::default().with_skip_delete(true);

        let report = cleanup(&mut session, &index, &ids(&["c1"]), MAIN_SCHEMA, &config).unwrap();
        assert!(report.skipped);
        assert_eq!(count(&mut session, "accounts"), 1);
        assert_eq!(count(&mut session, "databasechangelog"), 3);

        let (_dir, target) = temp_target("skip");
        let mut on_disk = target.connect().unwrap();
        on_disk.apply_changelog(index.changelog("a.toml").unwrap()).unwrap();
        drop(on_disk);
        tear_down(&target, &config).unwrap();
        let mut on_disk = target.connect().unwrap();
        assert_eq!(
            on_disk.table_names(MAIN_SCHEMA).unwrap(),
            vec!["accounts", "databasechangelog"]
        );
    }

    #[test]
    fn tear_down_drops_everything() {
        let index = sample_index();
        let (_dir, target) = temp_target("tear-down");
        let mut session = target.connect().unwrap();
        for changelog in index.changelogs() {
            session.apply_changelog(changelog).unwrap();
        }
        drop(session);

        tear_down(&target, &HarnessConfig::default()).unwrap();
        let mut session = target.connect().unwrap();
        assert!(session.table_names(MAIN_SCHEMA).unwrap().is_empty());
    }

    #[test]
    fn guard_runs_cleanup_after_success() {
        let mut calls = Vec::new();
        let result = guard(
            &mut calls,
            |calls| {
                calls.push("body");
                Ok(())
            },
            |calls| {
                calls.push("cleanup");
                Ok(())
            },
        );
        assert!(result.is_ok());
        assert_eq!(calls, vec!["body", "cleanup"]);
    }

    #[test]
    fn guard_surfaces_cleanup_error_after_passing_body() {
        let result = guard(&mut (), |_| Ok(()), |_| Err(Error::Generic("cleanup broke".into())));
        assert!(matches!(result, Err(Error::Generic(ref msg)) if msg == "cleanup broke"));
    }

    #[test]
    fn guard_keeps_body_error_over_cleanup_error() {
        let result = guard(
            &mut (),
            |_| Err(Error::TestFailed("assertion".into())),
            |_| Err(Error::Generic("cleanup broke".into())),
        );
        assert!(matches!(result, Err(Error::TestFailed(ref msg)) if msg == "assertion"));
    }

    #[test]
    fn guard_catches_panics_and_still_cleans_up() {
        let mut cleaned = false;
        let result = guard(
            &mut cleaned,
            |_| panic!("boom"),
            |cleaned| {
                *cleaned = true;
                Ok(())
            },
        );
        assert!(cleaned);
        assert!(matches!(result, Err(Error::TestFailed(ref msg)) if msg.contains("boom")));
    }
}
