#![cfg_attr(docsrs, feature(doc_cfg))]
//! `migratest` tests a single database migration at the point in history where it runs.
//!
//! Core concepts:
//! - A [Catalog] of file-based migrations, ordered by identifier. Identifiers carry a
//!   timestamp prefix by convention, so identifier order is execution order.
//! - A [MigrationRunner] that, given the migration under test, wipes the database,
//!   replays every migration before it, runs your setup code, applies the migration
//!   under test and runs your assertions.
//!
//! # Motivation
//!
//! Data migrations are easy to get wrong and hard to test after the fact: by the time
//! a test runs, the schema has moved on. Testing a migration means recreating the
//! database exactly as it looked just before the migration ran, seeding it with rows
//! shaped the old way, then checking what the migration did to them.
//!
//! ```ignore
//! use migratest::sqlite::SqliteBackend;
//! use migratest::{MigrationCatalog, MigrationRunner, Scenario, TestEnvironmentState};
//!
//! let mut runner = MigrationRunner::new(
//!     MigrationCatalog::new(["migrations"]),
//!     SqliteBackend::open_in_memory()?,
//! );
//! let mut state = TestEnvironmentState::new();
//!
//! runner.run_scenario(
//!     "2024_11_22_110000_rename_name_to_title_on_books_table",
//!     Scenario::new()
//!         .setup(|db: &mut SqliteBackend| {
//!             db.execute("INSERT INTO books (id, name) VALUES (15, 'Dune')")
//!         })
//!         .assertions(|db: &mut SqliteBackend| {
//!             let title: String = db.query_one("SELECT title FROM books WHERE id = 15")?;
//!             assert_eq!(title, "Dune");
//!             Ok(())
//!         }),
//!     &mut state,
//! )?;
//! ```
//!
//! # Collaborators
//!
//! The runner does no database work itself. It drives three traits, all implemented by
//! [`SqliteBackend`](sqlite::SqliteBackend):
//! - [Ledger]: which migrations are applied, and resetting that record.
//! - [Apply]: running a list of migrations in order.
//! - [DatabaseReset]: dropping everything in the database.
//!
//! Migration discovery goes through [MigrationSource]; [DirectorySource] is the default.
//!
//! # Features
//!
//! - `sqlite` (default): the [`sqlite`] backend.
//! - `tracing` (default): log discovery, resets and migration runs with `tracing`.

mod catalog;
pub use catalog::{
    identifier_from_path, Catalog, DirectorySource, MigrationCatalog, MigrationSource,
    MigrationUnit,
};

mod config;
pub use config::RunnerConfig;

mod error;
pub use error::Error;

mod executor;
pub use executor::{Apply, MigrationExecutor, TestEnvironmentState};

mod ledger;
pub use ledger::{AppliedSet, Ledger};

pub mod planner;

mod runner;
pub use runner::{DatabaseReset, MigrationBackend, MigrationRunner, Scenario, ScenarioReport};

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;
