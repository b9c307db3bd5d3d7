//! SQL for the `migrations` bookkeeping table.
//!
//! One record per applied migration file. `id` orders records by insertion,
//! `filename` is the natural key, `executed_at` is informational.

/// Longest filename the `filename` column accepts.
pub const MAX_FILENAME_LEN: usize = 255;

pub const POSTGRES_CREATE_LEDGER_SQL: &str = "
CREATE TABLE IF NOT EXISTS migrations (
    id BIGSERIAL PRIMARY KEY,
    filename VARCHAR(255) NOT NULL UNIQUE,
    executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
";

pub const SQLITE_CREATE_LEDGER_SQL: &str = "
CREATE TABLE IF NOT EXISTS migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename VARCHAR(255) NOT NULL UNIQUE,
    executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
";

pub const SELECT_APPLIED_SQL: &str = "SELECT filename FROM migrations ORDER BY id";

pub const SELECT_RECORDS_SQL: &str = "SELECT id, filename, executed_at FROM migrations ORDER BY id";

pub const POSTGRES_INSERT_RECORD_SQL: &str = "INSERT INTO migrations (filename) VALUES ($1)";

pub const SQLITE_INSERT_RECORD_SQL: &str = "INSERT INTO migrations (filename) VALUES (?1)";
