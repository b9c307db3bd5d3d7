use chrono::NaiveDateTime;
use schemaledger_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::migrations::MigrationFile;
use crate::postgres;
use crate::provider::Database;
use crate::schema::MAX_FILENAME_LEN;

/// One row of the `migrations` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub filename: String,
    pub executed_at: Option<NaiveDateTime>,
}

/// Reads and writes the record of which migration files have been applied.
///
/// Records are only ever inserted. The unique constraint on `filename` is what
/// keeps two runners from applying the same file: the loser of a race gets
/// [`Error::DuplicateRecord`].
#[derive(Debug, Clone)]
pub struct MigrationTracker {
    db: Database,
}

impl MigrationTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create the bookkeeping table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        match &self.db {
            Database::Postgres(pool) => postgres::ensure_schema(pool).await?,
            Database::Sqlite(db) => db.ensure_schema()?,
        }
        debug!("migrations table ensured ({})", self.db.backend());
        Ok(())
    }

    /// Filenames of applied migrations in the order they were recorded.
    pub async fn list_applied(&self) -> Result<Vec<String>> {
        match &self.db {
            Database::Postgres(pool) => postgres::list_applied(pool).await,
            Database::Sqlite(db) => db.list_applied(),
        }
    }

    pub async fn list_records(&self) -> Result<Vec<MigrationRecord>> {
        match &self.db {
            Database::Postgres(pool) => postgres::list_records(pool).await,
            Database::Sqlite(db) => db.list_records(),
        }
    }

    /// Mark `filename` as applied without running anything.
    pub async fn record_applied(&self, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        match &self.db {
            Database::Postgres(pool) => postgres::record_applied(pool, filename).await?,
            Database::Sqlite(db) => db.record_applied(filename)?,
        }
        info!("recorded migration {filename}");
        Ok(())
    }

    /// Execute a migration and record it atomically. Either both the schema
    /// change and the record commit, or neither does.
    pub async fn apply(&self, migration: &MigrationFile) -> Result<()> {
        validate_filename(&migration.filename)?;
        match &self.db {
            Database::Postgres(pool) => {
                postgres::apply(pool, &migration.filename, &migration.sql).await?
            }
            Database::Sqlite(db) => db.apply(&migration.filename, &migration.sql)?,
        }
        info!("applied migration {}", migration.filename);
        Ok(())
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(Error::Config("migration filename cannot be empty".into()));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(Error::Config(format!(
            "migration filename exceeds {MAX_FILENAME_LEN} bytes: {filename}"
        )));
    }
    Ok(())
}
