//! Changelog documents and the resources they are loaded from.
//!
//! A changelog is an ordered list of changesets. It is written as TOML
//! (or JSON, when the resource path ends in `.json`):
//!
//! ```toml
//! [[changeset]]
//! id = "create-users"
//! author = "alice"
//! sql = "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"
//! rollback = "DROP TABLE users"
//!
//! [[changeset]]
//! id = "add-user-email"
//! sql = "ALTER TABLE users ADD COLUMN email TEXT"
//! ```
//!
//! `sql` and `rollback` may hold several statements; they are executed as one batch.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// One atomic, uniquely identified migration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    /// Globally unique id.
    pub id: String,
    /// Optional author, recorded in the history table.
    #[serde(default)]
    pub author: Option<String>,
    /// Forward SQL batch.
    pub sql: String,
    /// SQL batch undoing `sql`, executed by the per-test cleanup when present.
    #[serde(default)]
    pub rollback: Option<String>,
}

impl Changeset {
    /// Create a changeset without author or rollback.
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: None,
            sql: sql.into(),
            rollback: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_rollback(mut self, rollback: impl Into<String>) -> Self {
        self.rollback = Some(rollback.into());
        self
    }

    /// Checksum of the changeset's identity and forward SQL.
    /// Stored in the history table so that edits to applied changesets are detected.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.author.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"|");
        hasher.update(self.sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// An ordered sequence of changesets identified by its resource path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changelog {
    path: String,
    changesets: Vec<Changeset>,
}

#[derive(Deserialize)]
struct ChangelogDocument {
    #[serde(default, rename = "changeset")]
    changesets: Vec<Changeset>,
}

impl Changelog {
    /// Create a changelog, rejecting ids repeated within it.
    pub fn try_new(path: impl Into<String>, changesets: Vec<Changeset>) -> Result<Self, Error> {
        let path = path.into();
        let mut seen = HashSet::new();
        for changeset in &changesets {
            if changeset.id.trim().is_empty() {
                return Err(Error::ChangelogParse {
                    path,
                    message: "changeset id must not be empty".to_string(),
                });
            }
            if !seen.insert(changeset.id.as_str()) {
                return Err(Error::DuplicateChangesetId {
                    id: changeset.id.clone(),
                    first: path.clone(),
                    second: path,
                });
            }
        }
        Ok(Self { path, changesets })
    }

    /// Create a changelog, panicking if it is invalid.
    /// For a non-panicking version, use `try_new`.
    pub fn new(path: impl Into<String>, changesets: Vec<Changeset>) -> Self {
        match Self::try_new(path, changesets) {
            Ok(changelog) => changelog,
            Err(err) => panic!("{}", err),
        }
    }

    /// Parse a changelog document. JSON is used for `.json` paths, TOML otherwise.
    pub fn parse(path: impl Into<String>, source: &str) -> Result<Self, Error> {
        let path = path.into();
        let document: ChangelogDocument = if path.ends_with(".json") {
            serde_json::from_str(source).map_err(|e| Error::ChangelogParse {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            toml::from_str(source).map_err(|e| Error::ChangelogParse {
                path: path.clone(),
                message: e.to_string(),
            })?
        };
        Self::try_new(path, document.changesets)
    }

    /// Load and parse a changelog through a resource loader.
    pub fn load(loader: &dyn ResourceLoader, path: &str) -> Result<Self, Error> {
        let source = loader.load(path)?;
        Self::parse(path, &source)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn changesets(&self) -> &[Changeset] {
        &self.changesets
    }

    /// Zero-based position of a changeset in this changelog.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.changesets.iter().position(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position_of(id).is_some()
    }
}

/// Resolves a logical resource path to the text of a changelog document.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<String, Error>;
}

/// Loads resources from files below a root directory.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl ResourceLoader for FileSystemLoader {
    fn load(&self, path: &str) -> Result<String, Error> {
        std::fs::read_to_string(self.root.join(path)).map_err(|source| Error::Resource {
            path: path.to_string(),
            source,
        })
    }
}

/// Serves resources from memory, for changelogs embedded with `include_str!` or built in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    resources: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource under `path`.
    pub fn with(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.resources.insert(path.into(), contents.into());
        self
    }
}

impl ResourceLoader for MemoryLoader {
    fn load(&self, path: &str) -> Result<String, Error> {
        self.resources
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Resource {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such resource"),
            })
    }
}
