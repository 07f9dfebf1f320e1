//! Runtime settings for the store and for logging. Defaults keep the database
//! in the user's home directory; environment variables override them so
//! deployments and tests can point elsewhere without code changes.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use directories::BaseDirs;
use tracing::level_filters::LevelFilter;

/// Folder name used beneath the user's home directory for application data.
const DATA_DIR_NAME: &str = ".songbook-manager";
/// SQLite file name stored inside the application data directory.
const DB_FILE_NAME: &str = "songbooks.sqlite";
/// How long a connection waits on a locked database before giving up.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub const ENV_DB_PATH: &str = "SONGBOOK_DB_PATH";
pub const ENV_BUSY_TIMEOUT_MS: &str = "SONGBOOK_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "SONGBOOK_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "SONGBOOK_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl StoreSettings {
    /// Settings for a database file at `path` with the default busy timeout.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("unknown log format `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Build settings from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. `from_env` delegates here
    /// so tests can feed values without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = match lookup(ENV_DB_PATH) {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => default_db_path()?,
        };

        let busy_timeout = match lookup(ENV_BUSY_TIMEOUT_MS) {
            Some(raw) => Duration::from_millis(
                raw.trim()
                    .parse()
                    .with_context(|| format!("invalid {ENV_BUSY_TIMEOUT_MS} value `{raw}`"))?,
            ),
            None => DEFAULT_BUSY_TIMEOUT,
        };

        let mut logging = LoggingSettings::default();
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            logging.level = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {ENV_LOG_LEVEL} value `{raw}`"))?;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            logging.format = raw.parse()?;
        }

        Ok(Self {
            store: StoreSettings { path, busy_timeout },
            logging,
        })
    }
}

/// Resolve the absolute path to the SQLite database inside the user's home.
fn default_db_path() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().ok_or_else(|| anyhow!("could not locate home directory"))?;
    Ok(base_dirs.home_dir().join(DATA_DIR_NAME).join(DB_FILE_NAME))
}
