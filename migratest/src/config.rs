//! Harness-wide settings.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Environment variable that turns on [HarnessConfig::skip_delete].
pub const SKIP_DELETE_ENV: &str = "MIGRATEST_SKIP_DELETE";

/// Settings shared by every test of a run.
///
/// Usually built in code; it also deserializes (for example from a
/// `[package.metadata.migratest.harness]` table) with every field optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Skip every tear-down and per-test cleanup, leaving the database as the
    /// last test left it. Meant for inspecting a deliberately failing run.
    pub skip_delete: bool,
    /// Execute the `rollback` SQL of changesets being rewound during cleanup.
    pub run_rollbacks: bool,
    /// Run independent database targets on a thread pool.
    pub parallel_targets: bool,
    /// Tables, besides [RESERVED_TABLES](crate::engine::RESERVED_TABLES), that
    /// per-test cleanup never empties.
    pub extra_reserved_tables: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            skip_delete: false,
            run_rollbacks: true,
            parallel_targets: false,
            extra_reserved_tables: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Defaults, with `skip_delete` read from `MIGRATEST_SKIP_DELETE`.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(SKIP_DELETE_ENV) {
            config.skip_delete = parse_flag(&value)?;
        }
        Ok(config)
    }

    pub fn with_skip_delete(mut self, skip_delete: bool) -> Self {
        self.skip_delete = skip_delete;
        self
    }

    pub fn with_run_rollbacks(mut self, run_rollbacks: bool) -> Self {
        self.run_rollbacks = run_rollbacks;
        self
    }

    pub fn with_parallel_targets(mut self, parallel_targets: bool) -> Self {
        self.parallel_targets = parallel_targets;
        self
    }

    pub fn with_reserved_table(mut self, table: impl Into<String>) -> Self {
        self.extra_reserved_tables.push(table.into());
        self
    }
}

fn parse_flag(value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidConfig(format!(
            "{} must be a boolean, found '{}'",
            SKIP_DELETE_ENV, other
        ))),
    }
}
