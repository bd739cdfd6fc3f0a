use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub(crate) const DEFAULT_MIGRATION_SUFFIX: &str = ".sql";

pub(crate) const DEFAULT_LEDGER_TABLE_NAME: &str = "migrations";

/// Where migrations live and how they are tracked.
///
/// Deserializable so it can be embedded in other configuration, eg. the
/// `[package.metadata.migratest]` table read by `cargo migratest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directories scanned for migration files. Later directories override
    /// earlier ones when the same identifier appears in both.
    pub directories: Vec<PathBuf>,
    /// File suffix marking a migration file, including the leading dot.
    pub suffix: String,
    /// Name of the table recording applied migrations.
    pub ledger_table: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            directories: vec![PathBuf::from("migrations")],
            suffix: DEFAULT_MIGRATION_SUFFIX.to_string(),
            ledger_table: DEFAULT_LEDGER_TABLE_NAME.to_string(),
        }
    }
}

impl RunnerConfig {
    /// Replace the configured directories.
    pub fn with_directories<I, P>(mut self, directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.directories = directories.into_iter().map(Into::into).collect();
        self
    }

    /// Append a directory after the existing ones.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directories.push(directory.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Set a custom name for the ledger table.
    /// Defaults to "migrations".
    pub fn with_ledger_table(mut self, name: impl Into<String>) -> Self {
        self.ledger_table = name.into();
        self
    }
}
