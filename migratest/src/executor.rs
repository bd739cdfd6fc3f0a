use crate::catalog::MigrationUnit;
use crate::error::Error;

/// The primitive that runs migrations against a database.
///
/// Implementations execute each unit's forward operation in order and record it
/// in the ledger as it completes. Transactions and skipping already-applied units
/// are their responsibility.
pub trait Apply {
    /// Apply `units` in order, returning the identifiers that were actually run.
    fn apply(&mut self, units: &[MigrationUnit]) -> Result<Vec<String>, Error>;
}

/// Whether the database under test is known to be at the latest migration.
///
/// Owned by the caller and handed to each runner operation that depends on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestEnvironmentState {
    pub migrated: bool,
}

impl TestEnvironmentState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Hands migration lists to an [Apply] primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationExecutor;

impl MigrationExecutor {
    /// Apply `units` in order. Errors from the primitive are returned as is.
    pub fn apply<A>(applier: &mut A, units: &[MigrationUnit]) -> Result<Vec<String>, Error>
    where
        A: Apply + ?Sized,
    {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            migrations = ?units.iter().map(MigrationUnit::identifier).collect::<Vec<_>>(),
            "Applying migrations"
        );

        let run = applier.apply(units)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(migrations_run = ?run, "Applied migrations");

        Ok(run)
    }

    /// Mark the environment as no longer known to be at the latest migration.
    pub fn reset_refresh_state(state: &mut TestEnvironmentState) {
        state.migrated = false;
    }
}
