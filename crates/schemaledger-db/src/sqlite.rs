use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use rusqlite::{Connection, TransactionBehavior, params};
use schemaledger_common::{Error, Result};
use tracing::{debug, info};

use crate::schema::{
    SELECT_APPLIED_SQL, SELECT_RECORDS_SQL, SQLITE_CREATE_LEDGER_SQL, SQLITE_INSERT_RECORD_SQL,
};
use crate::tracker::MigrationRecord;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-connection SQLite backend. Statements are serialized through the
/// mutex; `None` means the handle has been closed.
pub struct SqliteDatabase {
    conn: Mutex<Option<Connection>>,
}

impl SqliteDatabase {
    pub fn open(db_path: &Path, busy_timeout: Option<Duration>) -> Result<Self> {
        info!("opening sqlite ledger at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Connection(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Connection(format!("failed to set pragmas: {e}")))?;

        Self::configure(conn, busy_timeout)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Connection(format!("failed to open in-memory database: {e}")))?;
        Self::configure(conn, None)
    }

    fn configure(conn: Connection, busy_timeout: Option<Duration>) -> Result<Self> {
        conn.busy_timeout(busy_timeout.unwrap_or(DEFAULT_BUSY_TIMEOUT))
            .map_err(|e| Error::Connection(format!("failed to set busy timeout: {e}")))?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| Error::Connection("sqlite ledger lock poisoned".into()))?;
        if guard.is_none() {
            return Err(Error::Connection("database handle is closed".into()));
        }
        Ok(guard)
    }

    pub fn ensure_schema(&self) -> Result<()> {
        let guard = self.connection()?;
        let conn = open_conn(&guard)?;
        conn.execute_batch(SQLITE_CREATE_LEDGER_SQL)
            .map_err(|e| Error::Schema(format!("failed to create migrations table: {e}")))?;
        Ok(())
    }

    pub fn list_applied(&self) -> Result<Vec<String>> {
        let guard = self.connection()?;
        let conn = open_conn(&guard)?;
        let mut stmt = conn
            .prepare(SELECT_APPLIED_SQL)
            .map_err(|e| Error::Query(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Query(format!("failed to query migrations: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Query(format!("failed to read migration row: {e}")))
    }

    pub fn list_records(&self) -> Result<Vec<MigrationRecord>> {
        let guard = self.connection()?;
        let conn = open_conn(&guard)?;
        let mut stmt = conn
            .prepare(SELECT_RECORDS_SQL)
            .map_err(|e| Error::Query(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(MigrationRecord {
                    id: row.get(0)?,
                    filename: row.get(1)?,
                    executed_at: row.get::<_, Option<String>>(2)?.and_then(parse_timestamp),
                })
            })
            .map_err(|e| Error::Query(format!("failed to query migrations: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Query(format!("failed to read migration row: {e}")))
    }

    pub fn record_applied(&self, filename: &str) -> Result<()> {
        let mut guard = self.connection()?;
        let tx = begin_immediate(&mut guard)?;
        tx.execute(SQLITE_INSERT_RECORD_SQL, params![filename])
            .map_err(|e| insert_error(filename, e))?;
        tx.commit()
            .map_err(|e| Error::Query(format!("failed to commit {filename}: {e}")))?;
        debug!("recorded migration {filename}");
        Ok(())
    }

    /// Record `filename` and run `sql` in one transaction. The record goes in
    /// first so a concurrent runner fails on the unique key before touching
    /// the schema.
    pub fn apply(&self, filename: &str, sql: &str) -> Result<()> {
        let mut guard = self.connection()?;
        let tx = begin_immediate(&mut guard)?;

        tx.execute(SQLITE_INSERT_RECORD_SQL, params![filename])
            .map_err(|e| insert_error(filename, e))?;
        tx.execute_batch(sql).map_err(|e| Error::Migration {
            filename: filename.to_string(),
            message: e.to_string(),
        })?;
        tx.commit()
            .map_err(|e| Error::Query(format!("failed to commit {filename}: {e}")))?;
        Ok(())
    }

    /// Drop the connection. Later calls fail with `Error::Connection`.
    pub fn close(&self) {
        if let Ok(mut guard) = self.conn.lock()
            && let Some(conn) = guard.take()
            && let Err((_, e)) = conn.close()
        {
            tracing::warn!("sqlite ledger did not close cleanly: {e}");
        }
    }
}

fn open_conn<'a>(guard: &'a MutexGuard<'_, Option<Connection>>) -> Result<&'a Connection> {
    guard
        .as_ref()
        .ok_or_else(|| Error::Connection("database handle is closed".into()))
}

/// Take the write lock up front. A deferred transaction that later upgrades
/// can fail with SQLITE_BUSY without waiting on the busy handler.
fn begin_immediate<'a>(
    guard: &'a mut MutexGuard<'_, Option<Connection>>,
) -> Result<rusqlite::Transaction<'a>> {
    guard
        .as_mut()
        .ok_or_else(|| Error::Connection("database handle is closed".into()))?
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::Query(format!("failed to begin transaction: {e}")))
}

fn insert_error(filename: &str, e: rusqlite::Error) -> Error {
    if is_unique_violation(&e) {
        Error::DuplicateRecord(filename.to_string())
    } else {
        Error::Query(format!("failed to record {filename}: {e}"))
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// CURRENT_TIMESTAMP produces "YYYY-MM-DD HH:MM:SS"
fn parse_timestamp(s: String) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f").ok()
}
