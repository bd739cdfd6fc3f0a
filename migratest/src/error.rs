/// Error type for the migratest crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A caller-supplied identifier (bare name or file path) is not in the catalog.
    #[error("Could not find migration file {0}")]
    MigrationNotFound(String),
    /// A resolved migration could not be located while walking the catalog.
    #[error("Migration {0} was resolved but is missing from the catalog walk")]
    TargetNotInCatalog(String),
    #[error("Migration {identifier} failed: {message}")]
    ApplyFailed { identifier: String, message: String },
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Rusqlite(rusqlite::Error),
    #[error("{0}")]
    Generic(String),
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

// Manual PartialEq implementation because std::io::Error doesn't implement PartialEq
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::MigrationNotFound(a), Self::MigrationNotFound(b)) => a == b,
            (Self::TargetNotInCatalog(a), Self::TargetNotInCatalog(b)) => a == b,
            (
                Self::ApplyFailed {
                    identifier: a,
                    message: am,
                },
                Self::ApplyFailed {
                    identifier: b,
                    message: bm,
                },
            ) => a == b && am == bm,
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind() && a.to_string() == b.to_string(),
            #[cfg(feature = "sqlite")]
            (Self::Rusqlite(a), Self::Rusqlite(b)) => a == b,
            (Self::Generic(a), Self::Generic(b)) => a == b,
            _ => false,
        }
    }
}
