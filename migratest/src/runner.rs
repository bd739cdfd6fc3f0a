//! The scenario orchestrator.
//!
//! A [MigrationRunner] tests one migration in isolation: it wipes the database,
//! replays every migration before the one under test, runs caller setup, applies
//! the migration under test and finally runs caller assertions.

use crate::catalog::{Catalog, MigrationCatalog, MigrationUnit};
use crate::config::RunnerConfig;
use crate::error::Error;
use crate::executor::{Apply, MigrationExecutor, TestEnvironmentState};
use crate::ledger::Ledger;
use crate::planner;

/// Destroys and recreates the database under test.
pub trait DatabaseReset {
    /// Drop every object in the database, the ledger included.
    fn wipe(&mut self) -> Result<(), Error>;
}

/// Everything the runner needs from the database side.
pub trait MigrationBackend: Ledger + Apply + DatabaseReset {}

impl<T> MigrationBackend for T where T: Ledger + Apply + DatabaseReset + ?Sized {}

type Callback<'a, B> = Box<dyn FnOnce(&mut B) -> Result<(), Error> + 'a>;

/// Caller code run around the migration under test.
///
/// `setup` runs after the earlier migrations are replayed and before the migration
/// under test; `assertions` runs after it. Both receive the backend so they can
/// read and write the database.
pub struct Scenario<'a, B> {
    setup: Option<Callback<'a, B>>,
    assertions: Option<Callback<'a, B>>,
}

impl<'a, B> Default for Scenario<'a, B> {
    fn default() -> Self {
        Self {
            setup: None,
            assertions: None,
        }
    }
}

impl<'a, B> Scenario<'a, B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut B) -> Result<(), Error> + 'a,
    {
        self.setup = Some(Box::new(setup));
        self
    }

    pub fn assertions<F>(mut self, assertions: F) -> Self
    where
        F: FnOnce(&mut B) -> Result<(), Error> + 'a,
    {
        self.assertions = Some(Box::new(assertions));
        self
    }
}

impl<'a, B> std::fmt::Debug for Scenario<'a, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("setup", &self.setup.is_some())
            .field("assertions", &self.assertions.is_some())
            .finish()
    }
}

/// What a successful [MigrationRunner::run_scenario] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Migrations replayed before the migration under test, in order.
    pub replayed: Vec<String>,
    /// Identifier of the migration under test.
    pub target: String,
}

/// Runs migration scenarios against a backend.
///
/// Construct one per test. The catalog it owns is discovered once and the
/// resolution cache lives as long as the runner.
#[derive(Debug)]
pub struct MigrationRunner<B> {
    catalog: MigrationCatalog,
    backend: B,
}

impl<B: MigrationBackend> MigrationRunner<B> {
    pub fn new(catalog: MigrationCatalog, backend: B) -> Self {
        Self { catalog, backend }
    }

    pub fn from_config(config: &RunnerConfig, backend: B) -> Self {
        Self::new(MigrationCatalog::from_config(config), backend)
    }

    /// Test the migration named by `target`, a bare identifier or a file path.
    ///
    /// Steps, each aborting the rest on failure:
    /// 1. resolve `target` (nothing is touched if it is unknown)
    /// 2. plan the migrations before it
    /// 3. wipe the database, reinitialize the ledger and clear `state.migrated`
    /// 4. replay the planned migrations
    /// 5. clear `state.migrated` again
    /// 6. run `setup`
    /// 7. apply `target`
    /// 8. run `assertions`
    ///
    /// No rollback is attempted on failure; the database is left as the last
    /// successful step left it.
    pub fn run_scenario(
        &mut self,
        target: &str,
        scenario: Scenario<'_, B>,
        state: &mut TestEnvironmentState,
    ) -> Result<ScenarioReport, Error> {
        let target = self.catalog.resolve(target)?;
        let before = planner::migrations_before(&target, self.catalog.list_migrations()?)?;

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "migration_scenario",
            migration = target.identifier(),
            replay = before.len()
        )
        .entered();

        self.reset_database()?;
        MigrationExecutor::reset_refresh_state(state);

        let replayed = MigrationExecutor::apply(&mut self.backend, &before)?;
        MigrationExecutor::reset_refresh_state(state);

        if let Some(setup) = scenario.setup {
            #[cfg(feature = "tracing")]
            tracing::debug!("Running scenario setup");
            setup(&mut self.backend)?;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Applying migration under test");
        MigrationExecutor::apply(&mut self.backend, std::slice::from_ref(&target))?;

        if let Some(assertions) = scenario.assertions {
            #[cfg(feature = "tracing")]
            tracing::debug!("Running scenario assertions");
            assertions(&mut self.backend)?;
        }

        Ok(ScenarioReport {
            replayed,
            target: target.identifier().to_string(),
        })
    }

    /// Migrations that [run_scenario](Self::run_scenario) would replay before `target`.
    pub fn migrations_before(&mut self, target: &str) -> Result<Vec<MigrationUnit>, Error> {
        let target = self.catalog.resolve(target)?;
        planner::migrations_before(&target, self.catalog.list_migrations()?)
    }

    /// The next `count` migrations the ledger doesn't list as applied.
    pub fn next_unapplied(&mut self, count: usize) -> Result<Vec<MigrationUnit>, Error> {
        let applied = self.backend.applied()?;
        let catalog = self.catalog.list_migrations()?;
        Ok(planner::next_unapplied(catalog, &applied, count))
    }

    /// Every migration the ledger doesn't list as applied.
    pub fn pending(&mut self) -> Result<Vec<MigrationUnit>, Error> {
        let applied = self.backend.applied()?;
        let catalog = self.catalog.list_migrations()?;
        Ok(planner::pending(catalog, &applied))
    }

    /// Apply the next `count` unapplied migrations.
    ///
    /// Unlike [run_scenario](Self::run_scenario) this leaves any
    /// [TestEnvironmentState] alone; callers stepping through migrations manage it
    /// themselves.
    pub fn migrate_next(&mut self, count: usize) -> Result<Vec<String>, Error> {
        let next = self.next_unapplied(count)?;
        MigrationExecutor::apply(&mut self.backend, &next)
    }

    /// Bring the database to the latest migration unless `state` says it already is.
    ///
    /// When `state.migrated` is false the database is wiped, every catalog
    /// migration is applied and `state.migrated` is set. Otherwise nothing happens.
    pub fn refresh_database(
        &mut self,
        state: &mut TestEnvironmentState,
    ) -> Result<Vec<String>, Error> {
        if state.migrated {
            #[cfg(feature = "tracing")]
            tracing::debug!("Database already migrated, skipping refresh");
            return Ok(Vec::new());
        }

        self.reset_database()?;
        let all = self.catalog.list_migrations()?.units().to_vec();
        let run = MigrationExecutor::apply(&mut self.backend, &all)?;
        state.migrated = true;
        Ok(run)
    }

    pub fn catalog(&mut self) -> Result<&Catalog, Error> {
        self.catalog.list_migrations()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    fn reset_database(&mut self) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::info!("Wiping database");
        self.backend.wipe()?;
        self.backend.reinitialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AppliedSet;
    use std::path::PathBuf;

    struct FixedSource(Vec<&'static str>);

    impl crate::catalog::MigrationSource for FixedSource {
        fn discover(
            &self,
            _directories: &[PathBuf],
            _suffix: &str,
        ) -> Result<Vec<(String, PathBuf)>, Error> {
            Ok(self
                .0
                .iter()
                .map(|id| (id.to_string(), PathBuf::from(format!("/db/{id}.sql"))))
                .collect())
        }
    }

    /// Backend that records every call it receives.
    #[derive(Default)]
    struct SpyBackend {
        events: Vec<String>,
        applied: Vec<String>,
        rows: Vec<String>,
        fail_apply: Option<&'static str>,
    }

    impl Ledger for SpyBackend {
        fn applied(&mut self) -> Result<AppliedSet, Error> {
            Ok(self.applied.iter().cloned().collect())
        }

        fn reinitialize(&mut self) -> Result<(), Error> {
            self.events.push("reinitialize".to_string());
            self.applied.clear();
            Ok(())
        }
    }

    impl Apply for SpyBackend {
        fn apply(&mut self, units: &[MigrationUnit]) -> Result<Vec<String>, Error> {
            let mut run = Vec::new();
            for unit in units {
                let identifier = unit.identifier().to_string();
                if self.fail_apply == Some(unit.identifier()) {
                    return Err(Error::ApplyFailed {
                        identifier,
                        message: "boom".to_string(),
                    });
                }
                if self.applied.contains(&identifier) {
                    continue;
                }
                self.events.push(format!("apply {identifier}"));
                self.applied.push(identifier.clone());
                run.push(identifier);
            }
            Ok(run)
        }
    }

    impl DatabaseReset for SpyBackend {
        fn wipe(&mut self) -> Result<(), Error> {
            self.events.push("wipe".to_string());
            self.applied.clear();
            self.rows.clear();
            Ok(())
        }
    }

    fn runner(identifiers: Vec<&'static str>) -> MigrationRunner<SpyBackend> {
        runner_with(identifiers, SpyBackend::default())
    }

    fn runner_with(
        identifiers: Vec<&'static str>,
        backend: SpyBackend,
    ) -> MigrationRunner<SpyBackend> {
        let catalog = MigrationCatalog::new(["/db"]).with_source(FixedSource(identifiers));
        MigrationRunner::new(catalog, backend)
    }

    #[test]
    fn scenario_runs_steps_in_order() {
        let mut runner = runner(vec!["1_a", "2_b", "3_c"]);
        let mut state = TestEnvironmentState { migrated: true };

        let report = runner
            .run_scenario(
                "3_c",
                Scenario::new()
                    .setup(|db: &mut SpyBackend| {
                        db.events.push("setup".to_string());
                        db.rows.push("harry potter".to_string());
                        Ok(())
                    })
                    .assertions(|db: &mut SpyBackend| {
                        db.events.push("assertions".to_string());
                        assert_eq!(db.rows, vec!["harry potter"]);
                        assert_eq!(db.applied, vec!["1_a", "2_b", "3_c"]);
                        Ok(())
                    }),
                &mut state,
            )
            .unwrap();

        assert_eq!(
            runner.backend().events,
            vec![
                "wipe",
                "reinitialize",
                "apply 1_a",
                "apply 2_b",
                "setup",
                "apply 3_c",
                "assertions",
            ]
        );
        assert_eq!(
            report,
            ScenarioReport {
                replayed: vec!["1_a".to_string(), "2_b".to_string()],
                target: "3_c".to_string(),
            }
        );
        assert!(!state.migrated);
    }

    #[test]
    fn unknown_target_fails_before_wipe() {
        let mut runner = runner(vec!["1_a", "2_b"]);
        let mut state = TestEnvironmentState { migrated: true };

        let err = runner
            .run_scenario(
                "nonexistent",
                Scenario::new().assertions(|_: &mut SpyBackend| {
                    panic!("assertions should not be executed")
                }),
                &mut state,
            )
            .unwrap_err();

        assert_eq!(err, Error::MigrationNotFound("nonexistent".to_string()));
        assert!(runner.backend().events.is_empty());
        assert!(state.migrated);
    }

    #[test]
    fn first_migration_replays_nothing() {
        let mut runner = runner(vec!["1_a", "2_b", "3_c"]);
        let mut state = TestEnvironmentState::new();

        let report = runner
            .run_scenario("1_a", Scenario::new(), &mut state)
            .unwrap();

        assert!(report.replayed.is_empty());
        assert_eq!(
            runner.backend().events,
            vec!["wipe", "reinitialize", "apply 1_a"]
        );
    }

    #[test]
    fn path_target_behaves_like_identifier() {
        let mut runner = runner(vec!["1_a", "2_b", "3_c"]);
        let mut state = TestEnvironmentState::new();

        let report = runner
            .run_scenario("/db/2_b.sql", Scenario::new(), &mut state)
            .unwrap();

        assert_eq!(report.target, "2_b");
        assert_eq!(report.replayed, vec!["1_a"]);
    }

    #[test]
    fn setup_failure_aborts_before_target() {
        let mut runner = runner(vec!["1_a", "2_b"]);
        let mut state = TestEnvironmentState::new();

        let err = runner
            .run_scenario(
                "2_b",
                Scenario::new()
                    .setup(|_: &mut SpyBackend| Err(Error::Generic("seed failed".to_string())))
                    .assertions(|_: &mut SpyBackend| {
                        panic!("assertions should not be executed")
                    }),
                &mut state,
            )
            .unwrap_err();

        assert_eq!(err, Error::Generic("seed failed".to_string()));
        assert_eq!(runner.backend().applied, vec!["1_a"]);
    }

    #[test]
    fn replay_failure_propagates_and_skips_setup() {
        let backend = SpyBackend {
            fail_apply: Some("1_a"),
            ..Default::default()
        };
        let mut runner = runner_with(vec!["1_a", "2_b"], backend);
        let mut state = TestEnvironmentState { migrated: true };

        let err = runner
            .run_scenario(
                "2_b",
                Scenario::new().setup(|_: &mut SpyBackend| panic!("setup should not be executed")),
                &mut state,
            )
            .unwrap_err();

        assert_eq!(
            err,
            Error::ApplyFailed {
                identifier: "1_a".to_string(),
                message: "boom".to_string(),
            }
        );
        assert_eq!(runner.backend().events, vec!["wipe", "reinitialize"]);
        assert!(!state.migrated);
    }

    #[test]
    fn refresh_after_failed_replay_migrates_again() {
        let backend = SpyBackend {
            fail_apply: Some("1_a"),
            ..Default::default()
        };
        let mut runner = runner_with(vec!["1_a", "2_b"], backend);
        let mut state = TestEnvironmentState { migrated: true };

        runner
            .run_scenario("2_b", Scenario::new(), &mut state)
            .unwrap_err();
        runner.backend_mut().fail_apply = None;

        assert_eq!(runner.refresh_database(&mut state).unwrap(), vec!["1_a", "2_b"]);
        assert!(state.migrated);
    }

    #[test]
    fn repeated_scenarios_start_from_clean_database() {
        let mut runner = runner(vec!["1_a", "2_b", "3_c"]);
        let mut state = TestEnvironmentState::new();

        runner
            .run_scenario("3_c", Scenario::new(), &mut state)
            .unwrap();
        let report = runner
            .run_scenario("2_b", Scenario::new(), &mut state)
            .unwrap();

        assert_eq!(report.replayed, vec!["1_a"]);
        assert_eq!(runner.backend().applied, vec!["1_a", "2_b"]);
    }

    #[test]
    fn migrations_before_by_name() {
        let mut runner = runner(vec!["1_a", "2_b", "3_c"]);
        let before = runner.migrations_before("3_c").unwrap();
        assert_eq!(
            before.iter().map(MigrationUnit::identifier).collect::<Vec<_>>(),
            vec!["1_a", "2_b"]
        );
    }

    #[test]
    fn migrate_next_steps_through_catalog() {
        let mut runner = runner(vec!["1_a", "2_b", "3_c", "4_d", "5_e"]);

        assert_eq!(runner.migrate_next(2).unwrap(), vec!["1_a", "2_b"]);
        assert_eq!(runner.migrate_next(2).unwrap(), vec!["3_c", "4_d"]);
        assert_eq!(runner.migrate_next(2).unwrap(), vec!["5_e"]);
        assert!(runner.migrate_next(2).unwrap().is_empty());
        assert!(!runner.backend().events.contains(&"wipe".to_string()));
    }

    #[test]
    fn pending_reflects_ledger() {
        let mut runner = runner(vec!["1_a", "2_b", "3_c"]);
        runner.migrate_next(1).unwrap();
        let pending = runner.pending().unwrap();
        assert_eq!(
            pending.iter().map(MigrationUnit::identifier).collect::<Vec<_>>(),
            vec!["2_b", "3_c"]
        );
    }

    #[test]
    fn refresh_database_runs_once_per_state() {
        let mut runner = runner(vec!["1_a", "2_b"]);
        let mut state = TestEnvironmentState::new();

        assert_eq!(runner.refresh_database(&mut state).unwrap(), vec!["1_a", "2_b"]);
        assert!(state.migrated);

        assert!(runner.refresh_database(&mut state).unwrap().is_empty());
        assert_eq!(
            runner.backend().events,
            vec!["wipe", "reinitialize", "apply 1_a", "apply 2_b"]
        );
    }

    #[test]
    fn scenario_forces_next_refresh() {
        let mut runner = runner(vec!["1_a", "2_b", "3_c"]);
        let mut state = TestEnvironmentState::new();

        runner.refresh_database(&mut state).unwrap();
        runner
            .run_scenario("2_b", Scenario::new(), &mut state)
            .unwrap();
        assert!(!state.migrated);

        assert_eq!(
            runner.refresh_database(&mut state).unwrap(),
            vec!["1_a", "2_b", "3_c"]
        );
        assert!(state.migrated);
    }
}
