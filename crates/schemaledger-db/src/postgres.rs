use std::str::FromStr;

use chrono::NaiveDateTime;
use schemaledger_common::{Error, Result};
use schemaledger_config::{ConnectionTarget, PoolConfig};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgConnection, PgPool};
use tracing::{debug, info};

use crate::schema::{
    POSTGRES_CREATE_LEDGER_SQL, POSTGRES_INSERT_RECORD_SQL, SELECT_APPLIED_SQL, SELECT_RECORDS_SQL,
};
use crate::tracker::MigrationRecord;

/// Build a lazily connecting pool. No socket is opened here, so an unreachable
/// server only shows up on the first query.
pub fn connect_lazy(target: &ConnectionTarget, pool: &PoolConfig) -> Result<PgPool> {
    let mut options = connect_options(target)?;
    if let Some(timeout) = pool.statement_timeout() {
        options = options.options([("statement_timeout", format!("{}ms", timeout.as_millis()))]);
    }

    let pg = PgPoolOptions::new()
        .max_connections(pool.max_connections)
        .min_connections(pool.min_connections)
        .acquire_timeout(pool.acquire_timeout())
        .idle_timeout(Some(pool.idle_timeout()))
        .max_lifetime(Some(pool.max_lifetime()))
        .connect_lazy_with(options);

    info!(
        "postgres pool configured for {} (max {} connections)",
        target.redacted(),
        pool.max_connections
    );
    Ok(pg)
}

fn connect_options(target: &ConnectionTarget) -> Result<PgConnectOptions> {
    match target {
        ConnectionTarget::Url(url) => PgConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("invalid DATABASE_URL: {e}"))),
        ConnectionTarget::Discrete {
            host,
            port,
            user,
            password,
            database,
        } => {
            let mut options = PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(database);
            if let Some(user) = user {
                options = options.username(user);
            }
            if let Some(password) = password {
                options = options.password(password);
            }
            Ok(options)
        }
    }
}

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    match sqlx::raw_sql(POSTGRES_CREATE_LEDGER_SQL).execute(pool).await {
        Ok(_) => Ok(()),
        // Two sessions racing on CREATE TABLE IF NOT EXISTS can collide on the
        // catalog's unique index; the loser still sees the table.
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            debug!("migrations table created concurrently: {e}");
            Ok(())
        }
        Err(e) => Err(classify(e, |msg| {
            Error::Schema(format!("failed to create migrations table: {msg}"))
        })),
    }
}

pub async fn list_applied(pool: &PgPool) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(SELECT_APPLIED_SQL)
        .fetch_all(pool)
        .await
        .map_err(|e| classify(e, |msg| Error::Query(format!("failed to query migrations: {msg}"))))
}

pub async fn list_records(pool: &PgPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query_as::<_, (i64, String, Option<NaiveDateTime>)>(SELECT_RECORDS_SQL)
        .fetch_all(pool)
        .await
        .map_err(|e| classify(e, |msg| Error::Query(format!("failed to query migrations: {msg}"))))?;

    Ok(rows
        .into_iter()
        .map(|(id, filename, executed_at)| MigrationRecord {
            id,
            filename,
            executed_at,
        })
        .collect())
}

pub async fn record_applied(pool: &PgPool, filename: &str) -> Result<()> {
    sqlx::query(POSTGRES_INSERT_RECORD_SQL)
        .bind(filename)
        .execute(pool)
        .await
        .map_err(|e| insert_error(filename, e))?;
    debug!("recorded migration {filename}");
    Ok(())
}

/// Record `filename` and run `sql` in one transaction. Dropping the
/// transaction on an early return rolls it back.
pub async fn apply(pool: &PgPool, filename: &str, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(|e| {
        classify(e, |msg| Error::Query(format!("failed to begin transaction: {msg}")))
    })?;

    // Every statement goes through one reborrowed connection so the future
    // stays `Send` for callers that spawn it.
    let conn: &mut PgConnection = &mut tx;

    // The insert blocks on a concurrent uncommitted insert of the same
    // filename and fails once that one commits.
    (&mut *conn)
        .execute(sqlx::query(POSTGRES_INSERT_RECORD_SQL).bind(filename))
        .await
        .map_err(|e| insert_error(filename, e))?;

    (&mut *conn).execute(sqlx::raw_sql(sql)).await.map_err(|e| {
        classify(e, |msg| Error::Migration {
            filename: filename.to_string(),
            message: msg,
        })
    })?;

    tx.commit().await.map_err(|e| {
        classify(e, |msg| Error::Query(format!("failed to commit {filename}: {msg}")))
    })
}

fn insert_error(filename: &str, e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::DuplicateRecord(filename.to_string())
        }
        _ => classify(e, |msg| Error::Query(format!("failed to record {filename}: {msg}"))),
    }
}

/// Transport and authentication failures become `Error::Connection`; the rest
/// go through `otherwise`.
fn classify(e: sqlx::Error, otherwise: impl FnOnce(String) -> Error) -> Error {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::Connection(e.to_string()),
        sqlx::Error::Configuration(_) => Error::Config(e.to_string()),
        sqlx::Error::Database(db) if is_connection_sqlstate(db.code().as_deref()) => {
            Error::Connection(e.to_string())
        }
        _ => otherwise(e.to_string()),
    }
}

// Class 08 is connection exception, class 28 is invalid authorization.
fn is_connection_sqlstate(code: Option<&str>) -> bool {
    code.is_some_and(|c| c.starts_with("08") || c.starts_with("28"))
}
