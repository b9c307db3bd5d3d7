use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use schemaledger_common::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PG_PORT: u16 = 5432;
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub migrations: MigrationsConfig,
}

/// Connection settings. Either `url` or the discrete fields are used, never
/// both; see [`DatabaseConfig::target`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: DEFAULT_PG_PORT,
            user: None,
            password: None,
            database: None,
            pool: PoolConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PG_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,

    /// Per-statement timeout. Unset means the server default.
    #[serde(default)]
    pub statement_timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: 0,
            acquire_timeout_secs: default_acquire_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_lifetime_secs: default_max_lifetime(),
            statement_timeout_secs: None,
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_lifetime() -> u64 {
    1800
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MIGRATIONS_DIR)
}

/// The one connection form that is active after precedence is applied.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Url(String),
    Discrete {
        host: String,
        port: u16,
        user: Option<String>,
        password: Option<String>,
        database: String,
    },
}

impl DatabaseConfig {
    /// A non-empty `url` wins. Otherwise `host` and `database` must both be
    /// present; `user` and `password` stay optional so the client library can
    /// fall back to its own defaults.
    pub fn target(&self) -> Result<ConnectionTarget> {
        if let Some(url) = non_empty(&self.url) {
            return Ok(ConnectionTarget::Url(url.to_string()));
        }

        match (non_empty(&self.host), non_empty(&self.database)) {
            (Some(host), Some(database)) => Ok(ConnectionTarget::Discrete {
                host: host.to_string(),
                port: self.port,
                user: non_empty(&self.user).map(str::to_string),
                password: self.password.clone(),
                database: database.to_string(),
            }),
            (None, None) => Err(Error::Config(
                "no database configured: set DATABASE_URL or DB_HOST and DB_DATABASE".into(),
            )),
            (None, Some(_)) => Err(Error::Config("DB_HOST is required without DATABASE_URL".into())),
            (Some(_), None) => Err(Error::Config(
                "DB_DATABASE is required without DATABASE_URL".into(),
            )),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ConnectionTarget {
    /// Printable form with any password masked.
    pub fn redacted(&self) -> String {
        match self {
            ConnectionTarget::Url(raw) => match url::Url::parse(raw) {
                Ok(mut parsed) => {
                    if parsed.password().is_some() {
                        let _ = parsed.set_password(Some("***"));
                    }
                    parsed.to_string()
                }
                // Unparseable strings may still carry credentials.
                Err(_) => "<unparseable url>".to_string(),
            },
            ConnectionTarget::Discrete {
                host,
                port,
                user,
                database,
                ..
            } => match user {
                Some(user) => format!("postgres://{user}@{host}:{port}/{database}"),
                None => format!("postgres://{host}:{port}/{database}"),
            },
        }
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionTarget").field(&self.redacted()).finish()
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
