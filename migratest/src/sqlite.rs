//!
//! # SQLite backend
//!
//! [SqliteBackend] implements every database collaborator the runner needs on top
//! of a [`rusqlite`](https://crates.io/crates/rusqlite) connection: the ledger, the
//! apply primitive and the database reset. It also carries query and assertion
//! helpers meant to be used from scenario setup and assertion callbacks.
//!
//! Migration files are plain SQL and are executed with `execute_batch`, each in
//! its own transaction. A failing migration is rolled back and not recorded;
//! migrations applied before it in the same call stay committed.
//!
//! ## Example
//!
//! ```ignore
//! use migratest::sqlite::SqliteBackend;
//! use migratest::{MigrationCatalog, MigrationRunner, Scenario, TestEnvironmentState};
//!
//! let backend = SqliteBackend::open_in_memory()?;
//! let mut runner = MigrationRunner::new(MigrationCatalog::new(["migrations"]), backend);
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

use crate::catalog::MigrationUnit;
use crate::config::{RunnerConfig, DEFAULT_LEDGER_TABLE_NAME};
use crate::error::Error;
use crate::executor::Apply;
use crate::ledger::{AppliedSet, Ledger};
use crate::runner::DatabaseReset;
use chrono::Utc;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// Re-export rusqlite types for use in scenario callbacks
pub use rusqlite::Connection as SqliteConnection;

/// A row of the ledger table.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMigration {
    /// Identifier of the migration.
    pub identifier: String,
    /// The apply call this migration was recorded in, starting at 1.
    pub batch: u32,
    /// The timestamp when the migration was applied.
    pub applied_at: chrono::DateTime<Utc>,
}

/// Represents a captured database schema for comparison and snapshotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Map of table name to table definitions
    pub tables: HashMap<String, TableSchema>,
}

/// Represents a table's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// List of columns
    pub columns: Vec<ColumnInfo>,
    /// List of indexes
    pub indexes: Vec<IndexInfo>,
}

/// Information about a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

/// Information about an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    pub sql: String,
}

/// Ledger, apply primitive and database reset for a SQLite connection.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Connection,
    ledger_table: String,
}

impl SqliteBackend {
    /// Wrap an existing connection. The ledger table defaults to "migrations".
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            ledger_table: DEFAULT_LEDGER_TABLE_NAME.to_string(),
        }
    }

    /// Wrap a connection, taking the ledger table name from `config`.
    pub fn from_config(conn: Connection, config: &RunnerConfig) -> Self {
        Self::new(conn).with_ledger_table(config.ledger_table.clone())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    /// Set a custom name for the ledger table.
    pub fn with_ledger_table(mut self, name: impl Into<String>) -> Self {
        self.ledger_table = name.into();
        self
    }

    pub fn ledger_table(&self) -> &str {
        &self.ledger_table
    }

    /// Get a reference to the underlying connection for advanced usage.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Every ledger row, in the order the migrations were applied.
    /// Returns an empty vector if the ledger table doesn't exist.
    pub fn history(&mut self) -> Result<Vec<AppliedMigration>, Error> {
        if !self.ledger_exists()? {
            return Ok(vec![]);
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT migration, batch, applied_at FROM {} ORDER BY id",
            quote_identifier(&self.ledger_table)
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(identifier, batch, applied_at)| {
                let applied_at = chrono::DateTime::parse_from_rfc3339(&applied_at)
                    .map_err(|e| Error::Generic(format!("Failed to parse datetime: {}", e)))?
                    .with_timezone(&Utc);
                Ok(AppliedMigration {
                    identifier,
                    batch,
                    applied_at,
                })
            })
            .collect()
    }

    fn ledger_exists(&self) -> Result<bool, Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [&self.ledger_table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_ledger(&self) -> Result<(), Error> {
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    migration TEXT NOT NULL UNIQUE,
                    batch INTEGER NOT NULL,
                    applied_at TEXT NOT NULL
                )",
                quote_identifier(&self.ledger_table)
            ),
            [],
        )?;
        Ok(())
    }

    /// Execute a SQL statement (for setting up test data).
    pub fn execute(&mut self, sql: &str) -> Result<(), Error> {
        self.conn.execute(sql, [])?;
        Ok(())
    }

    /// Query a single value from the database.
    pub fn query_one<T>(&mut self, sql: &str) -> Result<T, Error>
    where
        T: rusqlite::types::FromSql,
    {
        let result = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(result)
    }

    /// Query all values from a single-column result.
    pub fn query_all<T>(&mut self, sql: &str) -> Result<Vec<T>, Error>
    where
        T: rusqlite::types::FromSql,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let results = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<T>, _>>()?;
        Ok(results)
    }

    /// Query with a custom row mapper.
    pub fn query_map<T, F>(&mut self, sql: &str, f: F) -> Result<Vec<T>, Error>
    where
        F: FnMut(&Row) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let results = stmt.query_map([], f)?.collect::<Result<Vec<T>, _>>()?;
        Ok(results)
    }

    /// Assert that a table exists in the database.
    pub fn assert_table_exists(&mut self, table_name: &str) -> Result<(), Error> {
        if self.count_objects("table", table_name)? == 0 {
            return Err(Error::Generic(format!(
                "Table '{}' does not exist",
                table_name
            )));
        }
        Ok(())
    }

    /// Assert that a table does not exist in the database.
    pub fn assert_table_not_exists(&mut self, table_name: &str) -> Result<(), Error> {
        if self.count_objects("table", table_name)? > 0 {
            return Err(Error::Generic(format!(
                "Table '{}' exists but should not",
                table_name
            )));
        }
        Ok(())
    }

    /// Assert that a column exists in a table.
    pub fn assert_column_exists(
        &mut self,
        table_name: &str,
        column_name: &str,
    ) -> Result<(), Error> {
        let columns = self.get_columns(table_name)?;

        if !columns.iter().any(|c| c.name == column_name) {
            return Err(Error::Generic(format!(
                "Column '{}' does not exist in table '{}'",
                column_name, table_name
            )));
        }

        Ok(())
    }

    /// Assert that an index exists.
    pub fn assert_index_exists(&mut self, index_name: &str) -> Result<(), Error> {
        if self.count_objects("index", index_name)? == 0 {
            return Err(Error::Generic(format!(
                "Index '{}' does not exist",
                index_name
            )));
        }
        Ok(())
    }

    /// Capture the current database schema as a snapshot. The ledger table is left out.
    pub fn capture_schema(&mut self) -> Result<SchemaSnapshot, Error> {
        let mut tables = HashMap::new();

        let table_names: Vec<String> = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != ?1",
            )?
            .query_map([&self.ledger_table], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        for table_name in table_names {
            let columns = self.get_columns(&table_name)?;
            let indexes = self.get_indexes(&table_name)?;
            tables.insert(table_name, TableSchema { columns, indexes });
        }

        Ok(SchemaSnapshot { tables })
    }

    /// Assert that the current schema matches a previously captured snapshot.
    pub fn assert_schema_matches(&mut self, expected: &SchemaSnapshot) -> Result<(), Error> {
        let actual = self.capture_schema()?;

        if actual != *expected {
            return Err(Error::Generic(format!(
                "Schema mismatch.\nExpected: {:#?}\nActual: {:#?}",
                expected, actual
            )));
        }

        Ok(())
    }

    fn count_objects(&self, kind: &str, name: &str) -> Result<i64, Error> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type=?1 AND name=?2",
            [kind, name],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn get_columns(&mut self, table_name: &str) -> Result<Vec<ColumnInfo>, Error> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_identifier(table_name)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    type_name: row.get(2)?,
                    not_null: row.get::<_, i32>(3)? != 0,
                    default_value: row.get(4)?,
                    primary_key: row.get::<_, i32>(5)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(columns)
    }

    fn get_indexes(&mut self, table_name: &str) -> Result<Vec<IndexInfo>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type='index' AND tbl_name=?1 AND sql IS NOT NULL ORDER BY name",
        )?;

        let indexes = stmt
            .query_map([table_name], |row| {
                let sql: String = row.get(1)?;
                Ok(IndexInfo {
                    name: row.get(0)?,
                    unique: sql.to_uppercase().starts_with("CREATE UNIQUE"),
                    sql,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(indexes)
    }
}

impl Ledger for SqliteBackend {
    fn applied(&mut self) -> Result<AppliedSet, Error> {
        if !self.ledger_exists()? {
            return Ok(AppliedSet::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT migration FROM {}",
            quote_identifier(&self.ledger_table)
        ))?;
        let applied = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<AppliedSet, _>>()?;
        Ok(applied)
    }

    fn reinitialize(&mut self) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::debug!(table = %self.ledger_table, "Reinitializing migration ledger");

        self.conn.execute(
            &format!(
                "DROP TABLE IF EXISTS {}",
                quote_identifier(&self.ledger_table)
            ),
            [],
        )?;
        self.create_ledger()
    }
}

impl Apply for SqliteBackend {
    fn apply(&mut self, units: &[MigrationUnit]) -> Result<Vec<String>, Error> {
        self.create_ledger()?;
        let applied = self.applied()?;

        let batch: u32 = self.conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(batch), 0) + 1 FROM {}",
                quote_identifier(&self.ledger_table)
            ),
            [],
            |row| row.get(0),
        )?;
        // All migrations in this call share one batch number and timestamp
        let batch_applied_at = Utc::now().to_rfc3339();
        let insert = format!(
            "INSERT INTO {} (migration, batch, applied_at) VALUES (?1, ?2, ?3)",
            quote_identifier(&self.ledger_table)
        );

        let mut migrations_run = Vec::new();
        for unit in units {
            let identifier = unit.identifier();
            if applied.contains(identifier) {
                #[cfg(feature = "tracing")]
                tracing::debug!(migration = identifier, "Migration already applied, skipping");
                continue;
            }

            #[cfg(feature = "tracing")]
            let _span =
                tracing::info_span!("sqlite_migration_up", migration = identifier).entered();
            #[cfg(feature = "tracing")]
            tracing::info!("Starting migration");

            let sql = std::fs::read_to_string(unit.source())?;

            let tx = self.conn.transaction()?;
            if let Err(error) = tx.execute_batch(&sql) {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %error, "Migration failed");
                // Dropping the transaction rolls it back
                return Err(Error::ApplyFailed {
                    identifier: identifier.to_string(),
                    message: error.to_string(),
                });
            }
            tx.execute(
                &insert,
                rusqlite::params![identifier, batch, batch_applied_at],
            )?;
            tx.commit()?;

            #[cfg(feature = "tracing")]
            tracing::info!(batch, "Migration completed");
            migrations_run.push(identifier.to_string());
        }

        Ok(migrations_run)
    }
}

impl DatabaseReset for SqliteBackend {
    fn wipe(&mut self) -> Result<(), Error> {
        let objects: Vec<(String, String)> = self
            .conn
            .prepare(
                "SELECT type, name FROM sqlite_master
                 WHERE type IN ('view', 'trigger', 'table') AND name NOT LIKE 'sqlite_%'
                 ORDER BY CASE type WHEN 'view' THEN 0 WHEN 'trigger' THEN 1 ELSE 2 END, name",
            )?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(objects = objects.len(), "Dropping all database objects");

        // Restore the caller's setting whether or not the drops succeed
        let foreign_keys: i64 = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        self.conn.execute_batch("PRAGMA foreign_keys = OFF")?;

        let dropped = objects.iter().try_for_each(|(kind, name)| {
            let statement = match kind.as_str() {
                "view" => "DROP VIEW IF EXISTS",
                "trigger" => "DROP TRIGGER IF EXISTS",
                _ => "DROP TABLE IF EXISTS",
            };
            self.conn
                .execute_batch(&format!("{} {}", statement, quote_identifier(name)))
        });

        let restore = if foreign_keys != 0 {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        self.conn.execute_batch(restore)?;
        dropped?;

        Ok(())
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
