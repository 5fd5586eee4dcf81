//! Cargo subcommand for migratest changelogs.
//!
//! This binary provides the `cargo migratest` command, which loads the
//! changelogs declared in `[package.metadata.migratest]` and shows the global
//! changeset order and what a migration test would apply, without a database.
//!
//! ```toml
//! [package.metadata.migratest]
//! changelog_root = "migrations"
//! changelogs = ["001-accounts.toml", "002-orders.toml"]
//! ```
//!
//! When `changelogs` is omitted, every `.toml` and `.json` file directly under
//! `changelog_root` is used.

use std::fs;
use std::path::{Path, PathBuf};

use cargo_metadata::MetadataCommand;
use clap::Parser;
use migratest::{ChangesetIndex, FileSystemLoader, MigrationPlan};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "cargo")]
#[command(bin_name = "cargo")]
struct Cargo {
    #[command(subcommand)]
    command: CargoCommands,
}

#[derive(clap::Subcommand)]
enum CargoCommands {
    /// Inspect migratest changelogs
    Migratest(MigratestArgs),
}

#[derive(clap::Args)]
struct MigratestArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// List every changeset in global order
    List {
        /// Print the changelogs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what a migration test naming these changesets would apply
    Plan {
        /// Changeset ids, as declared by the test
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Load and validate every changelog
    Check,
}

#[derive(Debug, Default, Deserialize)]
struct MigratestConfig {
    /// Directory changelog paths are relative to, from the package root (default: ".")
    #[serde(default = "default_changelog_root")]
    changelog_root: String,
    /// Changelog resources, relative to `changelog_root`
    #[serde(default)]
    changelogs: Vec<String>,
}

fn default_changelog_root() -> String {
    ".".to_string()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Cargo {
        command: CargoCommands::Migratest(args),
    } = Cargo::parse();

    let metadata = MetadataCommand::new().exec()?;
    let root_package = metadata
        .root_package()
        .ok_or("No root package found. Are you in a Cargo project directory?")?;

    let config: MigratestConfig = match root_package.metadata.get("migratest") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| format!("Invalid migratest config: {}", e))?,
        None => MigratestConfig {
            changelog_root: default_changelog_root(),
            changelogs: Vec::new(),
        },
    };

    let package_dir = root_package
        .manifest_path
        .parent()
        .ok_or("Could not determine package directory")?;
    let root = package_dir.as_std_path().join(&config.changelog_root);

    let paths = changelog_paths(&root, &config)?;
    if paths.is_empty() {
        return Err(format!("No changelogs found under {}", root.display()).into());
    }
    let index = ChangesetIndex::build(&FileSystemLoader::new(&root), &paths)?;

    match args.command {
        Command::List { json } => print_list(&index, json)?,
        Command::Plan { ids } => print_plan(&index, &ids)?,
        Command::Check => println!(
            "OK: {} changelogs, {} changesets",
            index.changelogs().count(),
            index.len()
        ),
    }
    Ok(())
}

/// The configured changelogs, or every changelog file directly under `root`.
fn changelog_paths(root: &Path, config: &MigratestConfig) -> Result<Vec<String>, std::io::Error> {
    if !config.changelogs.is_empty() {
        return Ok(config.changelogs.clone());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(root)? {
        let path: PathBuf = entry?.path();
        let is_changelog = path
            .extension()
            .is_some_and(|ext| ext == "toml" || ext == "json");
        if path.is_file() && is_changelog {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                paths.push(name.to_string());
            }
        }
    }
    paths.sort();
    Ok(paths)
}

fn print_list(index: &ChangesetIndex, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let changelogs: Vec<_> = index
            .changelogs()
            .map(|changelog| {
                serde_json::json!({
                    "path": changelog.path(),
                    "changesets": changelog.changesets(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&changelogs)?);
        return Ok(());
    }

    for changelog in index.changelogs() {
        println!("{}", changelog.path());
        for changeset in changelog.changesets() {
            let position = index.global_position(&changeset.id).unwrap_or_default();
            match &changeset.author {
                Some(author) => println!("  {:>4}  {} ({})", position, changeset.id, author),
                None => println!("  {:>4}  {}", position, changeset.id),
            }
        }
    }
    Ok(())
}

fn print_plan(index: &ChangesetIndex, ids: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let plan = MigrationPlan::for_changesets(index, ids)?;
    let foreign: Vec<&str> = ids
        .iter()
        .filter(|id| index.resource_of(id) != Some(plan.own_changelog.as_str()))
        .map(|id| id.as_str())
        .collect();
    if !foreign.is_empty() {
        return Err(format!(
            "Changesets {:?} are not declared in '{}'; a test's changesets must share one changelog",
            foreign, plan.own_changelog
        )
        .into());
    }

    println!("Applied in full:");
    if plan.prior_changelogs.is_empty() {
        println!("  (none)");
    }
    for path in &plan.prior_changelogs {
        println!("  {}", path);
    }
    println!("Applied from {}:", plan.own_changelog);
    if let Some(own) = index.changelog(&plan.own_changelog) {
        for changeset in &own.changesets()[..=plan.through_position] {
            println!("  {}", changeset.id);
        }
    }
    Ok(())
}
