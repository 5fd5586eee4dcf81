//! What a migration test body sees.

use crate::driver::{MigrationHandle, PreparedMigration};
use crate::engine::{Session, TargetConfig};
use crate::error::Error;

/// The database of a test case, brought to the state right after the test's
/// changesets were applied.
///
/// Assertion helpers return [Error::TestFailed] so that bodies can use `?`:
///
/// ```ignore
/// MigrationTest::new("orders")
///     .changeset("create-orders")
///     .case("table exists", |ctx| {
///         ctx.assert_table_exists("orders")?;
///         ctx.assert_column_exists("orders", "account_id")
///     })
/// ```
pub struct MigrationContext<'a> {
    handle: &'a mut MigrationHandle,
    target: &'a TargetConfig,
    changeset_ids: &'a [String],
    test_name: &'a str,
    case_name: &'a str,
}

impl<'a> MigrationContext<'a> {
    pub(crate) fn new(
        handle: &'a mut MigrationHandle,
        target: &'a TargetConfig,
        changeset_ids: &'a [String],
        test_name: &'a str,
        case_name: &'a str,
    ) -> Self {
        Self {
            handle,
            target,
            changeset_ids,
            test_name,
            case_name,
        }
    }

    /// The live session, as migration engine and raw connection.
    pub fn session(&mut self) -> &mut dyn Session {
        self.handle.session()
    }

    /// The concrete session type, for backend-specific queries.
    ///
    /// ```ignore
    /// let sqlite = ctx.native::<SqliteSession>().unwrap();
    /// let count: i64 = sqlite.query_one("SELECT COUNT(*) FROM orders")?;
    /// ```
    pub fn native<T: 'static>(&mut self) -> Option<&mut T> {
        self.handle.session().as_any_mut().downcast_mut::<T>()
    }

    pub fn target(&self) -> &TargetConfig {
        self.target
    }

    pub fn schema(&self) -> &str {
        self.target.schema()
    }

    pub fn changeset_ids(&self) -> &[String] {
        self.changeset_ids
    }

    pub fn test_name(&self) -> &str {
        self.test_name
    }

    pub fn case_name(&self) -> &str {
        self.case_name
    }

    pub fn prepared(&self) -> Option<&PreparedMigration> {
        self.handle.prepared()
    }

    pub fn execute(&mut self, sql: &str) -> Result<u64, Error> {
        self.handle.session().execute(sql)
    }

    pub fn execute_batch(&mut self, sql: &str) -> Result<(), Error> {
        self.handle.session().execute_batch(sql)
    }

    pub fn table_exists(&mut self, table: &str) -> Result<bool, Error> {
        let schema = self.target.schema();
        Ok(self
            .handle
            .session()
            .table_names(schema)?
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table)))
    }

    pub fn assert_table_exists(&mut self, table: &str) -> Result<(), Error> {
        if !self.table_exists(table)? {
            return Err(Error::TestFailed(format!(
                "Table '{}' does not exist in schema '{}'",
                table,
                self.schema()
            )));
        }
        Ok(())
    }

    pub fn assert_table_not_exists(&mut self, table: &str) -> Result<(), Error> {
        if self.table_exists(table)? {
            return Err(Error::TestFailed(format!(
                "Table '{}' exists in schema '{}' but should not",
                table,
                self.schema()
            )));
        }
        Ok(())
    }

    pub fn assert_column_exists(&mut self, table: &str, column: &str) -> Result<(), Error> {
        let schema = self.target.schema();
        let columns = self.handle.session().column_names(schema, table)?;
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            return Err(Error::TestFailed(format!(
                "Column '{}' does not exist on '{}' (columns: {:?})",
                column, table, columns
            )));
        }
        Ok(())
    }

    /// Ids recorded in the history table, oldest first.
    pub fn applied_changesets(&mut self) -> Result<Vec<String>, Error> {
        let mut history = self.handle.session().history_since(0)?;
        history.reverse();
        Ok(history.into_iter().map(|entry| entry.id).collect())
    }

    pub fn assert_applied(&mut self, id: &str) -> Result<(), Error> {
        if !self.applied_changesets()?.iter().any(|applied| applied == id) {
            return Err(Error::TestFailed(format!(
                "Changeset '{}' has not been applied",
                id
            )));
        }
        Ok(())
    }

    pub fn assert_not_applied(&mut self, id: &str) -> Result<(), Error> {
        if self.applied_changesets()?.iter().any(|applied| applied == id) {
            return Err(Error::TestFailed(format!(
                "Changeset '{}' has been applied but should not have been",
                id
            )));
        }
        Ok(())
    }
}
