use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use schemaledger_common::{Error, Result};
use schemaledger_config::{ConnectionTarget, DatabaseConfig};
use sqlx::PgPool;
use tracing::info;

use crate::postgres;
use crate::sqlite::SqliteDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Postgres => f.write_str("postgres"),
            Backend::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// Process-wide database handle. Cloning is cheap and every clone shares the
/// same pool, so build it once at startup and pass it to whoever needs it.
#[derive(Clone)]
pub enum Database {
    Postgres(PgPool),
    Sqlite(Arc<SqliteDatabase>),
}

impl Database {
    /// Build the handle for whichever connection form `config` resolves to.
    /// PostgreSQL pools connect lazily and must be built inside a Tokio
    /// runtime; SQLite files are opened immediately.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let target = config.target()?;
        config.pool.validate()?;

        if let ConnectionTarget::Url(url) = &target
            && let Some(location) = sqlite_location(url)
        {
            let db = match location {
                SqliteLocation::Memory => SqliteDatabase::in_memory()?,
                SqliteLocation::File(path) => {
                    SqliteDatabase::open(&path, config.pool.statement_timeout())?
                }
            };
            return Ok(Database::Sqlite(Arc::new(db)));
        }

        match &target {
            ConnectionTarget::Url(url) if !is_postgres_url(url) => Err(Error::Config(format!(
                "unsupported database scheme in {}",
                target.redacted()
            ))),
            _ => {
                // The pool spawns its reaper task on the current runtime.
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(Error::Config(
                        "a postgres pool must be created inside a Tokio runtime".into(),
                    ));
                }
                Ok(Database::Postgres(postgres::connect_lazy(&target, &config.pool)?))
            }
        }
    }

    pub fn sqlite_in_memory() -> Result<Self> {
        Ok(Database::Sqlite(Arc::new(SqliteDatabase::in_memory()?)))
    }

    pub fn backend(&self) -> Backend {
        match self {
            Database::Postgres(_) => Backend::Postgres,
            Database::Sqlite(_) => Backend::Sqlite,
        }
    }

    /// The underlying pool, for callers issuing their own queries.
    pub fn as_postgres(&self) -> Option<&PgPool> {
        match self {
            Database::Postgres(pool) => Some(pool),
            Database::Sqlite(_) => None,
        }
    }

    /// Release every pooled connection. Shared by all clones, so call it once
    /// at shutdown; repeated calls are no-ops.
    pub async fn close(&self) {
        match self {
            Database::Postgres(pool) => {
                if !pool.is_closed() {
                    pool.close().await;
                    info!("postgres pool closed");
                }
            }
            Database::Sqlite(db) => db.close(),
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Database").field(&self.backend()).finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SqliteLocation {
    Memory,
    File(PathBuf),
}

fn sqlite_location(url: &str) -> Option<SqliteLocation> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or(rest);

    if path.is_empty() || path == ":memory:" {
        Some(SqliteLocation::Memory)
    } else {
        Some(SqliteLocation::File(PathBuf::from(path)))
    }
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}
