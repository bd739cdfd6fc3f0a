//! Cargo subcommand for migratest.
//!
//! This binary provides the `cargo migratest` command, which inspects the migration
//! catalog of the current package and steps a SQLite database through it, based on
//! configuration in `Cargo.toml`.

use std::path::PathBuf;

use cargo_metadata::MetadataCommand;
use clap::Parser;
use migratest::sqlite::SqliteBackend;
use migratest::{planner, MigrationCatalog, MigrationRunner, RunnerConfig};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cargo")]
#[command(bin_name = "cargo")]
struct Cargo {
    #[command(subcommand)]
    command: CargoCommands,
}

#[derive(clap::Subcommand)]
enum CargoCommands {
    /// Inspect and apply migratest migrations
    Migratest(MigratestArgs),
}

#[derive(clap::Args)]
struct MigratestArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List all migrations in the catalog (no database required)
    List,
    /// Show the migrations replayed before TARGET when testing it (no database required)
    Plan {
        /// Migration identifier or path to its file
        target: String,
    },
    /// Show migrations not yet applied (requires database)
    Pending,
    /// Apply the next unapplied migrations (requires database)
    Step {
        /// How many migrations to apply
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
}

/// Contents of `[package.metadata.migratest]`.
#[derive(Debug, Deserialize)]
struct MigratestConfig {
    #[serde(flatten)]
    runner: RunnerConfig,
    /// Environment variable holding the SQLite database path (default: "DATABASE_URL")
    #[serde(default = "default_database_url_env")]
    database_url_env: String,
}

impl Default for MigratestConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            database_url_env: default_database_url_env(),
        }
    }
}

fn default_database_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let Cargo {
        command: CargoCommands::Migratest(args),
    } = Cargo::parse();

    let config = load_config()?;
    tracing::debug!(?config, "Loaded migratest configuration");

    match args.command {
        Commands::List => {
            let mut catalog = MigrationCatalog::from_config(&config.runner);
            let migrations = catalog.list_migrations()?;
            if migrations.is_empty() {
                println!("No migrations found.");
            } else {
                println!("Defined migrations ({}):", migrations.len());
                for unit in migrations {
                    println!("  {}", unit.identifier());
                    println!("      {}", unit.source().display());
                }
            }
        }
        Commands::Plan { target } => {
            let mut catalog = MigrationCatalog::from_config(&config.runner);
            let target = catalog.resolve(&target)?;
            let before = planner::migrations_before(&target, catalog.list_migrations()?)?;
            println!("Replayed before {} ({}):", target.identifier(), before.len());
            for unit in &before {
                println!("  {}", unit.identifier());
            }
        }
        Commands::Pending => {
            let mut runner = open_runner(&config)?;
            let pending = runner.pending()?;
            if pending.is_empty() {
                println!("Database is up to date.");
            } else {
                println!("Pending migrations ({}):", pending.len());
                for unit in &pending {
                    println!("  {}", unit.identifier());
                }
            }
        }
        Commands::Step { count } => {
            let mut runner = open_runner(&config)?;
            let run = runner.migrate_next(count)?;
            if run.is_empty() {
                println!("Nothing to apply.");
            }
            for identifier in &run {
                println!("Applied {}", identifier);
            }
        }
    }

    Ok(())
}

/// Read `[package.metadata.migratest]` from the root package, resolving migration
/// directories against the package directory.
fn load_config() -> Result<MigratestConfig, Box<dyn std::error::Error>> {
    let metadata = MetadataCommand::new().no_deps().exec()?;
    let root_package = metadata
        .root_package()
        .ok_or("No root package found. Are you in a Cargo project directory?")?;

    let mut config: MigratestConfig = match root_package.metadata.get("migratest") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| format!("Invalid migratest config: {}", e))?,
        None => MigratestConfig::default(),
    };

    let package_dir = root_package
        .manifest_path
        .parent()
        .ok_or("Could not determine package directory")?;
    config.runner.directories = config
        .runner
        .directories
        .iter()
        .map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                package_dir.as_std_path().join(dir)
            }
        })
        .collect();

    Ok(config)
}

fn open_runner(
    config: &MigratestConfig,
) -> Result<MigrationRunner<SqliteBackend>, Box<dyn std::error::Error>> {
    let database_url = std::env::var(&config.database_url_env)
        .map_err(|_| format!("Environment variable {} not set", config.database_url_env))?;
    let path = database_path(&database_url);

    let conn = rusqlite::Connection::open(&path)?;
    let backend = SqliteBackend::from_config(conn, &config.runner);
    Ok(MigrationRunner::from_config(&config.runner, backend))
}

/// Accepts a bare path or a `sqlite:` URL.
fn database_path(database_url: &str) -> PathBuf {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_path_accepts_urls_and_paths() {
        assert_eq!(database_path("sqlite://db/app.db"), PathBuf::from("db/app.db"));
        assert_eq!(database_path("sqlite:app.db"), PathBuf::from("app.db"));
        assert_eq!(database_path("/var/app.db"), PathBuf::from("/var/app.db"));
    }

    #[test]
    fn config_from_metadata() {
        let value = serde_json::json!({
            "directories": ["db/migrations", "plugins/migrations"],
            "ledger_table": "_ledger_",
            "database_url_env": "APP_DB",
        });
        let config: MigratestConfig = serde_json::from_value(value).unwrap();
        assert_eq!(
            config.runner.directories,
            vec![
                PathBuf::from("db/migrations"),
                PathBuf::from("plugins/migrations")
            ]
        );
        assert_eq!(config.runner.suffix, ".sql");
        assert_eq!(config.runner.ledger_table, "_ledger_");
        assert_eq!(config.database_url_env, "APP_DB");
    }

    #[test]
    fn config_defaults() {
        let config: MigratestConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(config.runner, RunnerConfig::default());
        assert_eq!(config.database_url_env, "DATABASE_URL");
    }

    #[test]
    fn parses_step_count() {
        let Cargo {
            command: CargoCommands::Migratest(args),
        } = Cargo::try_parse_from(["cargo", "migratest", "step", "--count", "3"]).unwrap();
        assert!(matches!(args.command, Commands::Step { count: 3 }));
    }
}
