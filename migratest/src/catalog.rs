//! Discovery, ordering and lookup of migration files.
//!
//! A [Catalog] is the ordered set of every known [MigrationUnit]. It is built
//! once per [MigrationCatalog] from a [MigrationSource] and then kept for the
//! lifetime of that value, together with a cache of resolved identifiers.

use crate::config::{RunnerConfig, DEFAULT_MIGRATION_SUFFIX};
use crate::error::Error;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// A single forward migration discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigrationUnit {
    identifier: String,
    source: PathBuf,
}

impl MigrationUnit {
    pub fn new(identifier: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            source: source.into(),
        }
    }

    /// The unique name of this migration, by convention prefixed with a timestamp.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Location of the file defining this migration.
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// All known migrations, ordered by identifier ascending.
/// Iteration order is execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    units: Vec<MigrationUnit>,
}

impl Catalog {
    /// Build a catalog from discovered `(identifier, location)` pairs.
    ///
    /// Entries are deduplicated by identifier; a later entry replaces an earlier one.
    pub fn from_discovered<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        let by_identifier: BTreeMap<String, PathBuf> = entries.into_iter().collect();
        let units = by_identifier
            .into_iter()
            .map(|(identifier, source)| MigrationUnit { identifier, source })
            .collect();
        Self { units }
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MigrationUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn first(&self) -> Option<&MigrationUnit> {
        self.units.first()
    }

    pub fn last(&self) -> Option<&MigrationUnit> {
        self.units.last()
    }

    /// Ordinal position of the migration with the given identifier.
    pub fn position(&self, identifier: &str) -> Option<usize> {
        self.units
            .binary_search_by(|unit| unit.identifier.as_str().cmp(identifier))
            .ok()
    }

    pub fn get(&self, identifier: &str) -> Option<&MigrationUnit> {
        self.position(identifier).map(|index| &self.units[index])
    }

    /// Reverse lookup from a file location to the migration defined there.
    pub fn find_by_source(&self, source: &Path) -> Option<&MigrationUnit> {
        self.units.iter().find(|unit| unit.source == source)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|unit| unit.identifier.as_str())
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a MigrationUnit;
    type IntoIter = std::slice::Iter<'a, MigrationUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.iter()
    }
}

/// Supplies the raw `(identifier, location)` pairs a [Catalog] is built from.
pub trait MigrationSource {
    /// Return every migration definition found in `directories`.
    /// Ordering and deduplication are left to [Catalog::from_discovered].
    fn discover(
        &self,
        directories: &[PathBuf],
        suffix: &str,
    ) -> Result<Vec<(String, PathBuf)>, Error>;
}

/// Discovers migrations from files named `<prefix>_<name><suffix>` in each directory.
///
/// Directories that don't exist are skipped. Subdirectories are not descended into.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectorySource;

impl MigrationSource for DirectorySource {
    fn discover(
        &self,
        directories: &[PathBuf],
        suffix: &str,
    ) -> Result<Vec<(String, PathBuf)>, Error> {
        let mut discovered = Vec::new();

        for directory in directories {
            if !directory.is_dir() {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    directory = %directory.display(),
                    "Skipping missing migration directory"
                );
                continue;
            }

            let mut entries = Vec::new();
            for entry in std::fs::read_dir(directory)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_file() || (file_type.is_symlink() && entry.path().is_file()) {
                    entries.push(entry);
                }
            }
            entries.sort_by_key(std::fs::DirEntry::file_name);

            for entry in entries {
                let path = entry.path();
                let Some(identifier) = identifier_from_path(&path, suffix) else {
                    continue;
                };
                // Same shape as the `*_*<suffix>` glob: a prefix, an underscore, a name.
                if !identifier.contains('_') {
                    continue;
                }
                discovered.push((identifier, path));
            }
        }

        Ok(discovered)
    }
}

/// Derive a bare identifier from a migration file path by stripping `suffix`
/// from the file name. Returns `None` if the file name doesn't carry the suffix.
pub fn identifier_from_path(path: &Path, suffix: &str) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let identifier = file_name.strip_suffix(suffix)?;
    if identifier.is_empty() {
        return None;
    }
    Some(identifier.to_string())
}

/// Owns the memoized [Catalog] and the resolution cache for one scenario.
pub struct MigrationCatalog {
    source: Box<dyn MigrationSource>,
    directories: Vec<PathBuf>,
    suffix: String,
    catalog: Option<Catalog>,
    resolved: HashMap<String, MigrationUnit>,
}

impl std::fmt::Debug for MigrationCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationCatalog")
            .field("directories", &self.directories)
            .field("suffix", &self.suffix)
            .field("catalog", &self.catalog)
            .field("resolved", &self.resolved.len())
            .finish()
    }
}

impl MigrationCatalog {
    /// Create a catalog reading `*.sql` files from the given directories.
    pub fn new<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            source: Box::new(DirectorySource),
            directories: directories.into_iter().map(Into::into).collect(),
            suffix: DEFAULT_MIGRATION_SUFFIX.to_string(),
            catalog: None,
            resolved: HashMap::new(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.directories.iter().cloned()).with_suffix(config.suffix.clone())
    }

    /// Replace the default [DirectorySource] with a custom provider.
    pub fn with_source(mut self, source: impl MigrationSource + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Whether `raw` names a migration file rather than a bare identifier.
    pub fn is_path_like(&self, raw: &str) -> bool {
        raw.ends_with(&self.suffix)
    }

    /// Discover and order all migrations.
    ///
    /// The source is consulted on the first call only; later calls return the same catalog.
    pub fn list_migrations(&mut self) -> Result<&Catalog, Error> {
        let catalog = match self.catalog.take() {
            Some(catalog) => catalog,
            None => {
                let discovered = self.source.discover(&self.directories, &self.suffix)?;
                let catalog = Catalog::from_discovered(discovered);
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    migrations = catalog.len(),
                    directories = ?self.directories,
                    "Discovered migrations"
                );
                catalog
            }
        };
        let catalog: &Catalog = self.catalog.insert(catalog);
        Ok(catalog)
    }

    /// Resolve a bare identifier or a migration file path to its catalog entry.
    ///
    /// Successful resolutions are cached by `raw`. Failures are not cached, so an
    /// unknown identifier is looked up again on every call.
    pub fn resolve(&mut self, raw: &str) -> Result<MigrationUnit, Error> {
        if let Some(unit) = self.resolved.get(raw) {
            return Ok(unit.clone());
        }

        let path_like = self.is_path_like(raw);
        let suffix = self.suffix.clone();
        let catalog = self.list_migrations()?;

        let found = if path_like {
            let path = Path::new(raw);
            catalog.find_by_source(path).or_else(|| {
                identifier_from_path(path, &suffix).and_then(|identifier| catalog.get(&identifier))
            })
        } else {
            catalog.get(raw)
        }
        .cloned();

        match found {
            Some(unit) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(raw, identifier = unit.identifier(), "Resolved migration");
                self.resolved.insert(raw.to_string(), unit.clone());
                Ok(unit)
            }
            None => Err(Error::MigrationNotFound(raw.to_string())),
        }
    }
}
