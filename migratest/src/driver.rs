//! Bringing a database to the state a migration test expects.
//!
//! A test names one or more changeset ids. Before its body runs, the database
//! must hold every changelog that precedes the test's own changelog, plus the
//! own changelog up to and including the earliest named changeset. The
//! [MigrationHandle] does exactly that, and nothing more, through a
//! [MigrationEngine](crate::engine::MigrationEngine).

use crate::engine::{Session, TargetConfig};
use crate::error::Error;
use crate::index::ChangesetIndex;

/// Where a [MigrationHandle] is in its setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Nothing applied yet.
    Idle,
    /// Every changelog preceding the own changelog is fully applied.
    PriorChangelogsApplied,
    /// The own changelog is applied through the earliest named changeset.
    OwnChangelogPartiallyApplied,
    /// Setup is committed; the test body may run.
    Ready,
}

/// What a test needs applied, computed from the index alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Changelogs applied in full, in order.
    pub prior_changelogs: Vec<String>,
    /// The changelog declaring the first named changeset.
    pub own_changelog: String,
    /// Position, within the own changelog, of the earliest named changeset.
    pub through_position: usize,
}

impl MigrationPlan {
    /// Plan the setup for a test naming `ids`.
    ///
    /// The own changelog is the one declaring the first listed id. Ids declared
    /// elsewhere do not move the position; the driver rejects them when it runs.
    pub fn for_changesets<S: AsRef<str>>(index: &ChangesetIndex, ids: &[S]) -> Result<Self, Error> {
        let first = ids
            .first()
            .ok_or_else(|| Error::MissingChangesetIds("<unnamed>".to_string()))?
            .as_ref();
        let own_changelog = index
            .resource_of(first)
            .ok_or_else(|| Error::UnresolvedChangeset(first.to_string()))?;

        let mut through_position = usize::MAX;
        for id in ids {
            let id = id.as_ref();
            if index.resource_of(id).is_none() {
                return Err(Error::UnresolvedChangeset(id.to_string()));
            }
            if let Some(position) = index.position_within(own_changelog, id) {
                through_position = through_position.min(position);
            }
        }

        Ok(Self {
            prior_changelogs: index
                .changelogs_required_before(ids)
                .into_iter()
                .map(String::from)
                .collect(),
            own_changelog: own_changelog.to_string(),
            through_position,
        })
    }
}

/// The outcome of [MigrationHandle::prepare].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMigration {
    pub plan: MigrationPlan,
    /// Index, in the own changelog's pending list, of the last applied changeset.
    pub pending_index: usize,
    /// Ids applied from the own changelog, in order.
    pub applied: Vec<String>,
}

/// A session scoped to one test execution.
///
/// Created fresh for every test case and dropped after its cleanup; the
/// connection is released when the handle is dropped.
pub struct MigrationHandle {
    session: Box<dyn Session>,
    state: DriverState,
    prepared: Option<PreparedMigration>,
}

impl std::fmt::Debug for MigrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationHandle")
            .field("state", &self.state)
            .field("prepared", &self.prepared)
            .finish()
    }
}

impl MigrationHandle {
    pub fn new(session: Box<dyn Session>) -> Self {
        Self {
            session,
            state: DriverState::Idle,
            prepared: None,
        }
    }

    /// Open a fresh session on `target`.
    pub fn open(target: &TargetConfig) -> Result<Self, Error> {
        Ok(Self::new(target.connect()?))
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn prepared(&self) -> Option<&PreparedMigration> {
        self.prepared.as_ref()
    }

    /// The live session, usable as migration engine and raw connection.
    pub fn session(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    /// Apply exactly what a test naming `ids` needs.
    ///
    /// Fails with [Error::UnresolvedChangeset] before touching the database when
    /// the first id is unknown, and with [Error::OrderingViolation] when a named
    /// changeset is not pending in the own changelog. Engine errors are returned
    /// as they are; nothing is retried.
    pub fn prepare<S: AsRef<str>>(
        &mut self,
        index: &ChangesetIndex,
        ids: &[S],
    ) -> Result<&PreparedMigration, Error> {
        if self.state != DriverState::Idle {
            return Err(Error::Generic(format!(
                "Migration handle already prepared (state {:?})",
                self.state
            )));
        }

        let plan = MigrationPlan::for_changesets(index, ids)?;
        let own = index
            .changelog(&plan.own_changelog)
            .ok_or_else(|| Error::UnresolvedChangeset(ids[0].as_ref().to_string()))?;

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "prepare_migration",
            own_changelog = %plan.own_changelog,
            ids = ?ids.iter().map(|id| id.as_ref()).collect::<Vec<_>>()
        )
        .entered();

        for path in &plan.prior_changelogs {
            if let Some(changelog) = index.changelog(path) {
                #[cfg(feature = "tracing")]
                tracing::debug!(changelog = %path, "Applying prior changelog");
                self.session.apply_changelog(changelog)?;
            }
        }
        self.state = DriverState::PriorChangelogsApplied;

        let pending = self.session.unapplied_changesets(own)?;
        let mut missing = Vec::new();
        let mut pending_index = usize::MAX;
        for id in ids {
            match pending.iter().position(|p| p == id.as_ref()) {
                Some(i) => pending_index = pending_index.min(i),
                None => missing.push(id.as_ref().to_string()),
            }
        }
        if !missing.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::error!(missing = ?missing, pending = ?pending, "Named changesets are not pending");
            return Err(Error::OrderingViolation {
                changelog: plan.own_changelog,
                ids: missing,
            });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(pending_index, "Applying own changelog");
        self.session.apply_changelog_up_to(own, pending_index)?;
        self.state = DriverState::OwnChangelogPartiallyApplied;

        if !self.session.is_autocommit() {
            self.session.commit()?;
        }
        self.state = DriverState::Ready;

        #[cfg(feature = "tracing")]
        tracing::info!(pending_index, "Migration test setup ready");

        Ok(self.prepared.insert(PreparedMigration {
            plan,
            pending_index,
            applied: pending[..=pending_index].to_vec(),
        }))
    }
}
