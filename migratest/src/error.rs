/// Error type for the migratest crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The same changeset id is declared twice, in one changelog or across two.
    #[error("Duplicate changeset id '{id}' found in '{first}' and '{second}'")]
    DuplicateChangesetId {
        id: String,
        first: String,
        second: String,
    },
    /// The same changelog resource was listed twice when building an index.
    #[error("Changelog resource '{0}' was listed more than once")]
    DuplicateChangelog(String),
    /// A changeset id does not belong to any known changelog.
    #[error("Changeset '{0}' is not declared in any known changelog")]
    UnresolvedChangeset(String),
    /// A test declared no changeset ids at all.
    #[error("Migration test '{0}' does not declare any changeset ids")]
    MissingChangesetIds(String),
    /// A test declared ids that live in more than one changelog.
    #[error("Migration test '{test}' declares changesets from several changelogs: {changelogs:?}")]
    SplitChangesetIds {
        test: String,
        changelogs: Vec<String>,
    },
    /// Exactly one database target was required.
    #[error("Migration test '{test}' needs exactly one database target, found {found}")]
    TargetCount { test: String, found: usize },
    /// A declared changeset was not among the unapplied changesets of its changelog.
    ///
    /// This means tests ran out of changeset order, which the suite ordering prevents.
    #[error(
        "Changesets {ids:?} are not pending in '{changelog}'. \
        Tests must run in changeset order; a suite orders them, a hand-run test may not."
    )]
    OrderingViolation { changelog: String, ids: Vec<String> },
    /// A changeset was modified after being applied.
    #[error(
        "Changeset '{id}' in '{changelog}' checksum mismatch. Expected '{expected}' but found '{found}'. \
        This indicates the changeset was modified after being applied."
    )]
    ChecksumMismatch {
        id: String,
        changelog: String,
        expected: String,
        found: String,
    },
    /// A changelog resource could not be read.
    #[error("Unable to load changelog resource '{path}': {source}")]
    Resource {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// A changelog resource could not be parsed.
    #[error("Invalid changelog '{path}': {message}")]
    ChangelogParse { path: String, message: String },
    /// Harness configuration could not be read.
    #[error("Invalid harness configuration: {0}")]
    InvalidConfig(String),
    /// A test body returned an error or panicked.
    #[error("{0}")]
    TestFailed(String),
    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Rusqlite(rusqlite::Error),
    #[cfg(feature = "postgres")]
    #[error("{0}")]
    Postgres(#[from] postgres::Error),
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Whether this error is raised while a suite or test is being declared,
    /// before any database work happens.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateChangesetId { .. }
                | Self::DuplicateChangelog(_)
                | Self::UnresolvedChangeset(_)
                | Self::MissingChangesetIds(_)
                | Self::SplitChangesetIds { .. }
                | Self::TargetCount { .. }
                | Self::Resource { .. }
                | Self::ChangelogParse { .. }
                | Self::InvalidConfig(_)
        )
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Rusqlite(value)
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Self::Generic(value.to_string())
    }
}
