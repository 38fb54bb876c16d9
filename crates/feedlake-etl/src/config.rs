//! Pipeline configuration
//!
//! Process settings come from environment variables (with `.env` support for
//! local runs). Stage configuration comes from small JSON files mapping a
//! table or schema name to a list of sources or tables.

use serde_json::{Map, Value};
use sqlx::postgres::PgConnectOptions;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::batch::DEFAULT_CHUNK_SIZE;
use crate::error::{EtlError, Result};
use crate::sql::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};

pub const DEFAULT_ETL_CONF: &str = "./etl_conf/etl_conf.json";
pub const DEFAULT_ETL_CONF_FALLBACK: &str = "./configs/etl_conf.json";
pub const DEFAULT_DWH_CONF: &str = "./configs/dwh_conf.json";
pub const DEFAULT_SQL_DIR: &str = "./sql";

/// Load `./.env` into the process environment. Exported variables win.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Load a specific env file. Exported variables win.
pub fn load_env_file(path: &Path) -> Option<PathBuf> {
    dotenvy::from_path(path).ok().map(|_| path.to_path_buf())
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Connection settings for the PostgreSQL store
#[derive(Clone)]
pub struct DatabaseConfig {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            name: env_string("POSTGRES_DB", ""),
            user: env_string("POSTGRES_USER", "postgres"),
            password: env_string("POSTGRES_PASSWORD", ""),
            host: env_string("DB_HOST", ""),
            port: env_parse("DB_PORT", 5432),
            connect_timeout_secs: env_parse("DB_CONNECT_TIMEOUT_SECS", 10),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EtlError::config("POSTGRES_DB must be set"));
        }
        if self.host.is_empty() {
            return Err(EtlError::config("DB_HOST must be set"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(EtlError::config("DB_CONNECT_TIMEOUT_SECS must be greater than 0"));
        }
        Ok(())
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Settings for one pipeline run
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub database: DatabaseConfig,
    /// Datalake config, preferred over `etl_conf_default`
    pub etl_conf: PathBuf,
    pub etl_conf_default: PathBuf,
    /// Dwh config, also its own fallback
    pub dwh_conf: PathBuf,
    pub sql_dir: PathBuf,
    pub chunk_size: usize,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub http_timeout_secs: u64,
    pub max_concurrent_loads: usize,
}

impl EtlConfig {
    /// Read settings from the environment, loading `./.env` first when the
    /// database host is not already exported.
    pub fn from_env() -> Result<Self> {
        if std::env::var("DB_HOST").is_err() {
            match load_dotenv() {
                Some(path) => debug!("Loaded environment from {}", path.display()),
                None => debug!("No .env loaded"),
            }
        }

        let config = Self {
            database: DatabaseConfig::from_env(),
            etl_conf: env_string("ETL_CONF", DEFAULT_ETL_CONF).into(),
            etl_conf_default: env_string("ETL_CONF_DEFAULT", DEFAULT_ETL_CONF_FALLBACK).into(),
            dwh_conf: env_string("DWH_CONF", DEFAULT_DWH_CONF).into(),
            sql_dir: env_string("ETL_SQL_DIR", DEFAULT_SQL_DIR).into(),
            chunk_size: env_parse("ETL_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            max_attempts: env_parse("ETL_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            retry_delay_secs: env_parse("ETL_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY.as_secs()),
            http_timeout_secs: env_parse("ETL_HTTP_TIMEOUT_SECS", 60),
            max_concurrent_loads: env_parse("ETL_MAX_CONCURRENT_LOADS", 1),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        if self.chunk_size == 0 {
            return Err(EtlError::config("ETL_CHUNK_SIZE must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(EtlError::config("ETL_MAX_ATTEMPTS must be greater than 0"));
        }
        if self.max_concurrent_loads == 0 {
            return Err(EtlError::config("ETL_MAX_CONCURRENT_LOADS must be greater than 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(EtlError::config("ETL_HTTP_TIMEOUT_SECS must be greater than 0"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Ordered `(name, identifier)` pairs of one stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageConfig {
    entries: Vec<(String, String)>,
}

impl StageConfig {
    /// Read `override_path`, or `default_path` when the override does not
    /// exist. Only a missing file triggers the fallback.
    pub fn load(stage: &str, override_path: &Path, default_path: &Path) -> Result<Self> {
        for path in [override_path, default_path] {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    info!("Using {} configuration from {}", stage, path.display());
                    return Self::parse(&content);
                },
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("{} configuration not found at {}", stage, path.display());
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(EtlError::ConfigurationMissing {
            stage: stage.to_string(),
            override_path: override_path.to_path_buf(),
            default_path: default_path.to_path_buf(),
        })
    }

    /// Parse `{"name": ["id", ...], ...}` keeping file order
    pub fn parse(content: &str) -> Result<Self> {
        let map: Map<String, Value> = serde_json::from_str(content)?;
        let mut entries = Vec::new();

        for (name, ids) in map {
            let Value::Array(ids) = ids else {
                return Err(EtlError::config(format!(
                    "Configuration entry '{}' must be a list",
                    name
                )));
            };
            for id in ids {
                let Value::String(id) = id else {
                    return Err(EtlError::config(format!(
                        "Configuration entry '{}' must only contain strings",
                        name
                    )));
                };
                entries.push((name.clone(), id));
            }
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for StageConfig {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
