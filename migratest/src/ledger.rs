use crate::error::Error;
use std::collections::BTreeSet;

/// Identifiers of the migrations currently recorded as applied.
pub type AppliedSet = BTreeSet<String>;

/// The persisted record of which migrations have run against a database.
///
/// Implementations are queried live on every call; nothing in this crate caches
/// the result, since setup code or a previous step may have changed it.
pub trait Ledger {
    /// Identifiers currently marked as applied.
    fn applied(&mut self) -> Result<AppliedSet, Error>;

    /// Replace the ledger with a fresh, empty one.
    fn reinitialize(&mut self) -> Result<(), Error>;
}
