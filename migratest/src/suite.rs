//! Declaring migration tests and running them in changeset order.
//!
//! A [MigrationTest] names the changesets it is about and carries one or more
//! named cases, which share the test's setup. Run on its own it gets a freshly
//! torn-down database per case.
//! Inside a [MigrationSuite] tests are ordered by the global position of their
//! earliest changeset and share each target's database, so the schema grows
//! one test at a time, the way it grows in production.
//!
//! ```no_run
//! use migratest::{HarnessConfig, MigrationSuite, MigrationTest};
//! use migratest::sqlite::SqliteProvider;
//!
//! let suite = MigrationSuite::builder()
//!     .changelogs(["migrations/001-accounts.toml", "migrations/002-orders.toml"])
//!     .target(SqliteProvider::new("target/migratest.db").into_target("sqlite"))
//!     .test(
//!         MigrationTest::new("orders")
//!             .changeset("create-orders")
//!             .case("table exists", |ctx| ctx.assert_table_exists("orders")),
//!     )
//!     .test(
//!         MigrationTest::new("accounts")
//!             .changeset("create-accounts")
//!             .case("table exists", |ctx| ctx.assert_table_exists("accounts")),
//!     )
//!     .config(HarnessConfig::from_env().unwrap())
//!     .build()
//!     .unwrap();
//!
//! // "accounts" runs first
//! suite.run().unwrap().assert_success();
//! ```

use crate::changelog::{FileSystemLoader, ResourceLoader};
use crate::config::HarnessConfig;
use crate::context::MigrationContext;
use crate::driver::MigrationHandle;
use crate::engine::TargetConfig;
use crate::error::Error;
use crate::index::ChangesetIndex;
use crate::isolation::{self, IsolationLevel};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;

/// The body of one test case.
pub type CaseBody = dyn Fn(&mut MigrationContext<'_>) -> Result<(), Error> + Send + Sync;

struct TestCase {
    name: String,
    body: Box<CaseBody>,
}

/// A migration test: one or more changeset ids and the cases that check them.
///
/// The database is brought to the state right after the named changesets and
/// the cases run against it in declaration order, with the data tables
/// emptied between them. After the last case the test's changesets are
/// rolled back again. A standalone run gives every case its own torn-down
/// database instead.
pub struct MigrationTest {
    name: String,
    changeset_ids: Vec<String>,
    changelogs: Vec<String>,
    targets: Vec<TargetConfig>,
    cases: Vec<TestCase>,
}

impl std::fmt::Debug for MigrationTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationTest")
            .field("name", &self.name)
            .field("changeset_ids", &self.changeset_ids)
            .field("changelogs", &self.changelogs)
            .field("targets", &self.targets)
            .field(
                "cases",
                &self.cases.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl MigrationTest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            changeset_ids: Vec::new(),
            changelogs: Vec::new(),
            targets: Vec::new(),
            cases: Vec::new(),
        }
    }

    /// Add a changeset this test is about. The first one added decides the
    /// test's own changelog.
    pub fn changeset(mut self, id: impl Into<String>) -> Self {
        self.changeset_ids.push(id.into());
        self
    }

    pub fn changesets<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changeset_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add a changelog resource to the test's scope.
    pub fn changelog(mut self, path: impl Into<String>) -> Self {
        self.changelogs.push(path.into());
        self
    }

    pub fn changelogs<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changelogs.extend(paths.into_iter().map(Into::into));
        self
    }

    /// The database this test uses when not given one by a suite.
    pub fn target(mut self, target: TargetConfig) -> Self {
        self.targets.push(target);
        self
    }

    pub fn case<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut MigrationContext<'_>) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.cases.push(TestCase {
            name: name.into(),
            body: Box::new(body),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn changeset_ids(&self) -> &[String] {
        &self.changeset_ids
    }

    pub fn changelog_paths(&self) -> &[String] {
        &self.changelogs
    }

    pub fn case_names(&self) -> impl Iterator<Item = &str> {
        self.cases.iter().map(|case| case.name.as_str())
    }

    /// Run every case of this test against its own target, tearing the
    /// database down before and after each case.
    pub fn run_standalone(
        &self,
        loader: &dyn ResourceLoader,
        config: &HarnessConfig,
    ) -> Result<SuiteReport, Error> {
        let index = ChangesetIndex::build(loader, &dedup(self.changelogs.iter()))?;
        self.validate(&index)?;
        let target = self.own_target()?;

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("migration_test", test = %self.name).entered();

        Ok(SuiteReport {
            outcomes: self.run_cases(&index, target, IsolationLevel::Isolated, config),
        })
    }

    fn own_target(&self) -> Result<&TargetConfig, Error> {
        match self.targets.as_slice() {
            [target] => Ok(target),
            targets => Err(Error::TargetCount {
                test: self.name.clone(),
                found: targets.len(),
            }),
        }
    }

    fn validate(&self, index: &ChangesetIndex) -> Result<(), Error> {
        if self.changeset_ids.is_empty() {
            return Err(Error::MissingChangesetIds(self.name.clone()));
        }
        let mut changelogs = BTreeSet::new();
        for id in &self.changeset_ids {
            let path = index
                .resource_of(id)
                .ok_or_else(|| Error::UnresolvedChangeset(id.clone()))?;
            changelogs.insert(path.to_string());
        }
        if changelogs.len() > 1 {
            return Err(Error::SplitChangesetIds {
                test: self.name.clone(),
                changelogs: changelogs.into_iter().collect(),
            });
        }
        Ok(())
    }

    fn run_cases(
        &self,
        index: &ChangesetIndex,
        target: &TargetConfig,
        level: IsolationLevel,
        config: &HarnessConfig,
    ) -> Vec<CaseOutcome> {
        match level {
            IsolationLevel::Isolated => self
                .cases
                .iter()
                .map(|case| {
                    self.run_case(case, target, || {
                        self.execute_isolated(case, index, target, config)
                    })
                })
                .collect(),
            IsolationLevel::Shared => self.run_shared(index, target, config),
        }
    }

    /// Set up once, run every case against that state and clean up after the
    /// last one. Between cases only the data tables are emptied.
    fn run_shared(
        &self,
        index: &ChangesetIndex,
        target: &TargetConfig,
        config: &HarnessConfig,
    ) -> Vec<CaseOutcome> {
        if self.cases.is_empty() {
            return Vec::new();
        }

        let mut handle = match MigrationHandle::open(target) {
            Ok(handle) => handle,
            Err(e) => return self.fail_every_case(target, &e),
        };
        if let Err(e) = handle.prepare(index, &self.changeset_ids) {
            // undo whatever part of the setup went through
            if let Err(_cleanup_error) = isolation::cleanup(
                handle.session(),
                index,
                &self.changeset_ids,
                target.schema(),
                config,
            ) {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %_cleanup_error, "Cleanup failed after a failing setup");
            }
            return self.fail_every_case(target, &e);
        }

        let last = self.cases.len() - 1;
        let mut outcomes = Vec::with_capacity(self.cases.len());
        for (position, case) in self.cases.iter().enumerate() {
            let outcome = self.run_case(case, target, || {
                isolation::guard(
                    &mut handle,
                    |handle| {
                        let mut ctx = MigrationContext::new(
                            handle,
                            target,
                            &self.changeset_ids,
                            &self.name,
                            &case.name,
                        );
                        (case.body)(&mut ctx)
                    },
                    |handle| {
                        let schema = target.schema();
                        let report = if position == last {
                            isolation::cleanup(handle.session(), index, &self.changeset_ids, schema, config)
                        } else {
                            isolation::clear_data(handle.session(), schema, config)
                        };
                        report.map(|_| ())
                    },
                )
            });
            outcomes.push(outcome);
        }
        outcomes
    }

    fn fail_every_case(&self, target: &TargetConfig, error: &Error) -> Vec<CaseOutcome> {
        let message = format!("Setup failed: {}", error);
        self.cases
            .iter()
            .map(|case| self.run_case(case, target, || Err(Error::Generic(message.clone()))))
            .collect()
    }

    fn run_case<F>(&self, case: &TestCase, target: &TargetConfig, run: F) -> CaseOutcome
    where
        F: FnOnce() -> Result<(), Error>,
    {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "migration_case",
            test = %self.name,
            case = %case.name,
            target_name = %target.name()
        )
        .entered();
        #[cfg(feature = "tracing")]
        tracing::info!("Running migration test case");

        let started = Instant::now();
        let result = run();
        let duration_ms = started.elapsed().as_millis() as u64;

        #[cfg(feature = "tracing")]
        match &result {
            Ok(()) => tracing::info!(duration_ms, "Migration test case passed"),
            Err(e) => tracing::error!(duration_ms, error = %e, "Migration test case failed"),
        }

        CaseOutcome {
            target: target.name().to_string(),
            test: self.name.clone(),
            case: case.name.clone(),
            passed: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
            duration_ms,
        }
    }

    /// Tear down, set up, run one case, clean up and tear down again.
    fn execute_isolated(
        &self,
        case: &TestCase,
        index: &ChangesetIndex,
        target: &TargetConfig,
        config: &HarnessConfig,
    ) -> Result<(), Error> {
        isolation::tear_down(target, config)?;

        let mut handle: Option<MigrationHandle> = None;
        let result = isolation::guard(
            &mut handle,
            |handle| {
                let handle = handle.insert(MigrationHandle::open(target)?);
                handle.prepare(index, &self.changeset_ids)?;
                let mut ctx = MigrationContext::new(
                    handle,
                    target,
                    &self.changeset_ids,
                    &self.name,
                    &case.name,
                );
                (case.body)(&mut ctx)
            },
            |handle| match handle.as_mut() {
                Some(handle) => isolation::cleanup(
                    handle.session(),
                    index,
                    &self.changeset_ids,
                    target.schema(),
                    config,
                )
                .map(|_| ()),
                None => Ok(()),
            },
        );
        // release the connection before tearing down
        drop(handle);

        match (&result, isolation::tear_down(target, config)) {
            (Ok(()), Err(e)) => return Err(e),
            (Err(_), Err(_e)) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %_e, "Tear-down failed after a failing test");
            }
            _ => {}
        }
        result
    }
}

/// Tests ordered by changeset, run against one or more targets.
#[derive(Debug)]
pub struct MigrationSuite {
    index: ChangesetIndex,
    tests: Vec<MigrationTest>,
    targets: Vec<TargetConfig>,
    config: HarnessConfig,
}

/// Builder for [MigrationSuite].
pub struct MigrationSuiteBuilder {
    changelogs: Vec<String>,
    loader: Option<Box<dyn ResourceLoader>>,
    tests: Vec<MigrationTest>,
    targets: Vec<TargetConfig>,
    config: HarnessConfig,
}

impl MigrationSuiteBuilder {
    /// Add a changelog resource shared by every test.
    pub fn changelog(mut self, path: impl Into<String>) -> Self {
        self.changelogs.push(path.into());
        self
    }

    pub fn changelogs<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changelogs.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Where changelog resources are read from. Defaults to the filesystem,
    /// relative to the working directory.
    pub fn loader(mut self, loader: impl ResourceLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Run every test against `target`. Without suite targets, each test
    /// runs against its own.
    pub fn target(mut self, target: TargetConfig) -> Self {
        self.targets.push(target);
        self
    }

    pub fn test(mut self, test: MigrationTest) -> Self {
        self.tests.push(test);
        self
    }

    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Load and index the changelogs, validate every test and order them.
    pub fn build(self) -> Result<MigrationSuite, Error> {
        let loader = self
            .loader
            .unwrap_or_else(|| Box::new(FileSystemLoader::new(".")));
        let paths = dedup(
            self.changelogs
                .iter()
                .chain(self.tests.iter().flat_map(|test| test.changelogs.iter())),
        );
        let index = ChangesetIndex::build(&*loader, &paths)?;

        for test in &self.tests {
            test.validate(&index)?;
            if self.targets.is_empty() {
                test.own_target()?;
            }
        }

        let mut tests = self.tests;
        // validated above, every test has a position
        tests.sort_by_key(|test| index.first_position(&test.changeset_ids));

        #[cfg(feature = "tracing")]
        tracing::debug!(
            order = ?tests.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "Ordered migration tests"
        );

        Ok(MigrationSuite {
            index,
            tests,
            targets: self.targets,
            config: self.config,
        })
    }
}

impl MigrationSuite {
    pub fn builder() -> MigrationSuiteBuilder {
        MigrationSuiteBuilder {
            changelogs: Vec::new(),
            loader: None,
            tests: Vec::new(),
            targets: Vec::new(),
            config: HarnessConfig::default(),
        }
    }

    pub fn index(&self) -> &ChangesetIndex {
        &self.index
    }

    /// Tests in execution order.
    pub fn tests(&self) -> &[MigrationTest] {
        &self.tests
    }

    pub fn targets(&self) -> &[TargetConfig] {
        &self.targets
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every test against every target.
    ///
    /// Suite targets are torn down before and after the run. Failures of
    /// individual cases are collected in the report; an `Err` means the run
    /// itself could not proceed.
    pub fn run(&self) -> Result<SuiteReport, Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "migration_suite",
            tests = self.tests.len(),
            targets = self.targets.len()
        )
        .entered();

        let outcomes = if self.targets.is_empty() {
            let mut outcomes = Vec::new();
            for test in &self.tests {
                let target = test.own_target()?;
                outcomes.extend(test.run_cases(&self.index, target, IsolationLevel::Shared, &self.config));
            }
            outcomes
        } else if self.config.parallel_targets {
            self.targets
                .par_iter()
                .map(|target| self.run_target(target))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .flatten()
                .collect()
        } else {
            let mut outcomes = Vec::new();
            for target in &self.targets {
                outcomes.extend(self.run_target(target)?);
            }
            outcomes
        };

        let report = SuiteReport { outcomes };
        #[cfg(feature = "tracing")]
        tracing::info!(
            passed = report.passed().count(),
            failed = report.failed().count(),
            "Migration suite finished"
        );
        Ok(report)
    }

    fn run_target(&self, target: &TargetConfig) -> Result<Vec<CaseOutcome>, Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("migration_target", target_name = %target.name()).entered();

        isolation::tear_down(target, &self.config)?;
        let outcomes = self
            .tests
            .iter()
            .flat_map(|test| test.run_cases(&self.index, target, IsolationLevel::Shared, &self.config))
            .collect();
        isolation::tear_down(target, &self.config)?;
        Ok(outcomes)
    }
}

/// The result of one case against one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseOutcome {
    pub target: String,
    pub test: String,
    pub case: String,
    pub passed: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Outcomes of a run, in execution order per target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    pub outcomes: Vec<CaseOutcome>,
}

impl SuiteReport {
    pub fn passed(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.outcomes.iter().filter(|o| o.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    /// Panic with a summary of every failed case.
    pub fn assert_success(&self) {
        if self.is_success() {
            return;
        }
        let failures = self
            .failed()
            .map(|o| {
                format!(
                    "  [{}] {} / {}: {}",
                    o.target,
                    o.test,
                    o.case,
                    o.error.as_deref().unwrap_or("failed")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        panic!(
            "{} of {} migration test cases failed:\n{}",
            self.failed().count(),
            self.outcomes.len(),
            failures
        );
    }
}

fn dedup<'a>(paths: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    paths
        .filter(|path| seen.insert(path.as_str()))
        .cloned()
        .collect()
}
