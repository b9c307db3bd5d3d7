use std::path::{Path, PathBuf};
use std::str::FromStr;

use schemaledger_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "schemaledger.toml";

/// Builds an [`AppConfig`] from an optional file, a `.env` file and the
/// process environment, in that order of increasing priority.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit config file. Unlike the default file, it must exist.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<AppConfig> {
        let mut config = match &self.path {
            Some(path) => read_config_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    read_config_file(default)?
                } else {
                    AppConfig::default()
                }
            }
        };

        load_dotenv()?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.database.pool.validate()?;

        info!(
            "config loaded - migrations dir: {}, max connections: {}",
            config.migrations.dir.display(),
            config.database.pool.max_connections
        );
        Ok(config)
    }
}

/// Load `.env` from the working directory (or a parent) into the process
/// environment. Variables that are already set are left alone, so calling it
/// more than once is harmless. Binaries call it before installing their log
/// subscriber so a `RUST_LOG` in `.env` is honoured.
pub fn load_dotenv() -> Result<Option<PathBuf>> {
    dotenv_outcome(dotenvy::dotenv())
}

/// Like [`load_dotenv`], for an explicit file.
pub fn load_dotenv_from(path: &Path) -> Result<Option<PathBuf>> {
    dotenv_outcome(dotenvy::from_path(path).map(|()| path.to_path_buf()))
}

fn dotenv_outcome(result: dotenvy::Result<PathBuf>) -> Result<Option<PathBuf>> {
    match result {
        Ok(path) => {
            debug!("loaded environment from {}", path.display());
            Ok(Some(path))
        }
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(Error::Config(format!("failed to read .env: {e}"))),
    }
}

fn read_config_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!("unsupported config extension: {other}"))),
    }
}

/// Overlay environment values onto `config`. `lookup` abstracts the
/// environment so callers can supply their own source.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let db = &mut config.database;

    if let Some(url) = lookup("DATABASE_URL") {
        db.url = Some(url);
    }
    if let Some(host) = lookup("DB_HOST") {
        db.host = Some(host);
    }
    if let Some(port) = parse_var(&lookup, "DB_PORT")? {
        db.port = port;
    }
    if let Some(user) = lookup("DB_USER") {
        db.user = Some(user);
    }
    if let Some(password) = lookup("DB_PASSWORD") {
        db.password = Some(password);
    }
    if let Some(database) = lookup("DB_DATABASE") {
        db.database = Some(database);
    }

    let pool = &mut db.pool;
    if let Some(v) = parse_var(&lookup, "DB_MAX_CONNECTIONS")? {
        pool.max_connections = v;
    }
    if let Some(v) = parse_var(&lookup, "DB_MIN_CONNECTIONS")? {
        pool.min_connections = v;
    }
    if let Some(v) = parse_var(&lookup, "DB_ACQUIRE_TIMEOUT_SECS")? {
        pool.acquire_timeout_secs = v;
    }
    if let Some(v) = parse_var(&lookup, "DB_IDLE_TIMEOUT_SECS")? {
        pool.idle_timeout_secs = v;
    }
    if let Some(v) = parse_var(&lookup, "DB_MAX_LIFETIME_SECS")? {
        pool.max_lifetime_secs = v;
    }
    if let Some(v) = parse_var(&lookup, "DB_STATEMENT_TIMEOUT_SECS")? {
        pool.statement_timeout_secs = Some(v);
    }

    if let Some(dir) = lookup("SCHEMALEDGER_MIGRATIONS_DIR") {
        config.migrations.dir = PathBuf::from(dir);
    }

    Ok(())
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {key} value {raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::ConnectionTarget;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn discrete_fields_with_default_port() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("DB_HOST", "localhost"),
                ("DB_USER", "app"),
                ("DB_PASSWORD", "secret"),
                ("DB_DATABASE", "appdb"),
            ]),
        )
        .unwrap();

        assert_eq!(config.database.port, 5432);
        assert!(matches!(
            config.database.target().unwrap(),
            ConnectionTarget::Discrete { .. }
        ));
    }

    #[test]
    fn database_url_wins_when_both_forms_are_set() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("DATABASE_URL", "postgres://localhost/primary"),
                ("DB_HOST", "ignored"),
                ("DB_DATABASE", "ignored"),
            ]),
        )
        .unwrap();

        assert_eq!(
            config.database.target().unwrap(),
            ConnectionTarget::Url("postgres://localhost/primary".into())
        );
    }

    #[test]
    fn malformed_port_is_a_config_error() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("DB_PORT", "fifty")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("DB_PORT"));
    }

    #[test]
    fn pool_knobs_and_migrations_dir_are_read() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("DB_MAX_CONNECTIONS", "4"),
                ("DB_STATEMENT_TIMEOUT_SECS", "15"),
                ("SCHEMALEDGER_MIGRATIONS_DIR", "/srv/app/database"),
            ]),
        )
        .unwrap();

        assert_eq!(config.database.pool.max_connections, 4);
        assert_eq!(config.database.pool.statement_timeout_secs, Some(15));
        assert_eq!(config.migrations.dir, PathBuf::from("/srv/app/database"));
    }

    #[test]
    fn toml_file_is_parsed_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(
            &path,
            r#"
[database]
host = "db.internal"
database = "appdb"

[database.pool]
max_connections = 3

[migrations]
dir = "sql"
"#,
        )
        .unwrap();

        let config = read_config_file(&path).unwrap();
        assert_eq!(config.database.host.as_deref(), Some("db.internal"));
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.pool.max_connections, 3);
        assert_eq!(config.database.pool.idle_timeout_secs, 600);
        assert_eq!(config.migrations.dir, PathBuf::from("sql"));
    }

    #[test]
    fn yaml_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.yml");
        std::fs::write(&path, r#"
database:
  url: "sqlite::memory:"
  pool:
    max_connections: 2
migrations:
  dir: db/migrations
"#).unwrap();

        let config = read_config_file(&path).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.database.pool.max_connections, 2);
        assert_eq!(config.database.pool.acquire_timeout_secs, 30);
        assert_eq!(config.migrations.dir, PathBuf::from("db/migrations"));
    }

    #[test]
    fn dotenv_file_populates_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "SCHEMALEDGER_DOTENV_TEST_FILTER=debug\n").unwrap();

        assert_eq!(load_dotenv_from(&path).unwrap(), Some(path.clone()));
        assert_eq!(
            std::env::var("SCHEMALEDGER_DOTENV_TEST_FILTER").as_deref(),
            Ok("debug")
        );
    }

    #[test]
    fn missing_dotenv_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_dotenv_from(&dir.path().join(".env")).unwrap(), None);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.ini");
        std::fs::write(&path, "").unwrap();

        assert!(matches!(read_config_file(&path), Err(Error::Config(_))));
    }
}
