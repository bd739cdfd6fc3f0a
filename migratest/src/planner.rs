//! Pure functions deciding which migrations to apply, and in what order.

use crate::catalog::{Catalog, MigrationUnit};
use crate::error::Error;
use crate::ledger::AppliedSet;

/// Every catalog entry that precedes `target`, in catalog order, excluding `target`.
///
/// Entries are matched on their source location. Returns
/// [Error::TargetNotInCatalog] if no entry shares the target's source, which means
/// the catalog and the resolved target have drifted apart.
pub fn migrations_before(
    target: &MigrationUnit,
    catalog: &Catalog,
) -> Result<Vec<MigrationUnit>, Error> {
    let mut before = Vec::new();
    for unit in catalog {
        if unit.source() == target.source() {
            return Ok(before);
        }
        before.push(unit.clone());
    }
    Err(Error::TargetNotInCatalog(target.identifier().to_string()))
}

/// Catalog entries not yet in `applied`, in catalog order.
pub fn pending(catalog: &Catalog, applied: &AppliedSet) -> Vec<MigrationUnit> {
    catalog
        .iter()
        .filter(|unit| !applied.contains(unit.identifier()))
        .cloned()
        .collect()
}

/// The first `count` catalog entries not yet in `applied`.
/// Returns fewer, or none, when the catalog runs out.
pub fn next_unapplied(
    catalog: &Catalog,
    applied: &AppliedSet,
    count: usize,
) -> Vec<MigrationUnit> {
    catalog
        .iter()
        .filter(|unit| !applied.contains(unit.identifier()))
        .take(count)
        .cloned()
        .collect()
}
