//! A global, deterministic ordering over the changesets of several changelogs.

use crate::changelog::{Changelog, Changeset, ResourceLoader};
use crate::error::Error;
use std::collections::{BTreeMap, HashMap};

/// Ordered, deduplicated view over all changesets of a fixed set of changelogs.
///
/// Changelogs are ordered by resource path (lexicographically), not by any
/// dependency between them: name resources in the order they must be applied
/// (`001-users.toml`, `002-orders.toml`, ...). Within a changelog, changesets
/// keep their declaration order. The flattened sequence of both orders is the
/// global order used to schedule migration tests.
#[derive(Debug, Clone)]
pub struct ChangesetIndex {
    changelogs: BTreeMap<String, Changelog>,
    // changeset id -> (changelog path, global position)
    positions: HashMap<String, (String, usize)>,
    flattened: Vec<String>,
}

impl ChangesetIndex {
    /// Load every changelog in `paths` through `loader` and index them.
    ///
    /// Fails when a path is listed twice or when a changeset id repeats across changelogs.
    pub fn build<S: AsRef<str>>(loader: &dyn ResourceLoader, paths: &[S]) -> Result<Self, Error> {
        let changelogs = paths
            .iter()
            .map(|path| Changelog::load(loader, path.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_changelogs(changelogs)
    }

    /// Index already-loaded changelogs.
    pub fn from_changelogs(changelogs: Vec<Changelog>) -> Result<Self, Error> {
        let mut by_path = BTreeMap::new();
        for changelog in changelogs {
            let path = changelog.path().to_string();
            if by_path.insert(path.clone(), changelog).is_some() {
                return Err(Error::DuplicateChangelog(path));
            }
        }

        let mut positions: HashMap<String, (String, usize)> = HashMap::new();
        let mut flattened = Vec::new();
        for (path, changelog) in &by_path {
            for changeset in changelog.changesets() {
                if let Some((first, _)) = positions.get(&changeset.id) {
                    return Err(Error::DuplicateChangesetId {
                        id: changeset.id.clone(),
                        first: first.clone(),
                        second: path.clone(),
                    });
                }
                positions.insert(changeset.id.clone(), (path.clone(), flattened.len()));
                flattened.push(changeset.id.clone());
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            changelogs = by_path.len(),
            changesets = flattened.len(),
            "Built changeset index"
        );

        Ok(Self {
            changelogs: by_path,
            positions,
            flattened,
        })
    }

    /// The changelog declaring `id`, if any.
    pub fn resource_of(&self, id: &str) -> Option<&str> {
        self.positions.get(id).map(|(path, _)| path.as_str())
    }

    /// Zero-based position of `id` inside the changelog at `path`.
    pub fn position_within(&self, path: &str, id: &str) -> Option<usize> {
        self.changelogs.get(path)?.position_of(id)
    }

    /// Position of `id` in the flattened sequence.
    ///
    /// Only meaningful as an ordering key between two ids of the same index.
    pub fn global_position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).map(|(_, position)| *position)
    }

    /// Every changelog that precedes the first changelog containing one of `ids`.
    ///
    /// The changelog containing the id is not included: it is only applied up to
    /// a prefix. If no id is known, every changelog is returned, which callers
    /// should treat as a configuration error.
    pub fn changelogs_required_before<S: AsRef<str>>(&self, ids: &[S]) -> Vec<&str> {
        self.changelogs
            .values()
            .take_while(|changelog| !ids.iter().any(|id| changelog.contains(id.as_ref())))
            .map(|changelog| changelog.path())
            .collect()
    }

    /// The smallest global position among `ids`, ignoring unknown ids.
    pub fn first_position<S: AsRef<str>>(&self, ids: &[S]) -> Option<usize> {
        ids.iter()
            .filter_map(|id| self.global_position(id.as_ref()))
            .min()
    }

    pub fn changelog(&self, path: &str) -> Option<&Changelog> {
        self.changelogs.get(path)
    }

    /// Changelogs in application order.
    pub fn changelogs(&self) -> impl Iterator<Item = &Changelog> {
        self.changelogs.values()
    }

    pub fn changeset(&self, id: &str) -> Option<&Changeset> {
        let path = self.resource_of(id)?;
        let changelog = self.changelogs.get(path)?;
        changelog.position_of(id).map(|i| &changelog.changesets()[i])
    }

    /// All changeset ids in global order.
    pub fn changeset_ids(&self) -> &[String] {
        &self.flattened
    }

    pub fn len(&self) -> usize {
        self.flattened.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flattened.is_empty()
    }
}
