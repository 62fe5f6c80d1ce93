// ABOUTME: Store configuration loaded from HOSTAL_* environment variables with validation.
// ABOUTME: Resolves the database location and the retry, retention and TTL knobs.

use std::path::PathBuf;

use thiserror::Error;

use crate::facade::DEFAULT_FACADE_TTL_MINUTES;
use crate::queue::DEFAULT_MAX_RETRIES;

pub const DEFAULT_DB_NAME: &str = "hostal";
pub const DEFAULT_RETENTION_DAYS: i64 = 7;
pub const DEFAULT_SNAPSHOT_TTL_MINUTES: i64 = 7 * 24 * 60;

/// Upper bounds for the time knobs: one hundred years.
pub const MAX_RETENTION_DAYS: i64 = 100 * 365;
pub const MAX_TTL_MINUTES: i64 = MAX_RETENTION_DAYS * 24 * 60;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid number: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    NotPositive { var: &'static str },

    #[error("{var} must be at most {max}")]
    TooLarge { var: &'static str, max: i64 },

    #[error("HOSTAL_DB_NAME must be a plain file name, got {0:?}")]
    InvalidDbName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub home: PathBuf,
    pub db_name: String,
    pub queue_max_retries: u32,
    pub queue_retention_days: i64,
    pub facade_ttl_minutes: i64,
    pub snapshot_ttl_minutes: i64,
    pub clear_session_on_start: bool,
}

impl StoreConfig {
    /// Defaults rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            db_name: DEFAULT_DB_NAME.to_string(),
            queue_max_retries: DEFAULT_MAX_RETRIES,
            queue_retention_days: DEFAULT_RETENTION_DAYS,
            facade_ttl_minutes: DEFAULT_FACADE_TTL_MINUTES,
            snapshot_ttl_minutes: DEFAULT_SNAPSHOT_TTL_MINUTES,
            clear_session_on_start: true,
        }
    }

    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - HOSTAL_HOME: data directory (default: ~/.hostal)
    /// - HOSTAL_DB_NAME: database file stem (default: hostal)
    /// - HOSTAL_QUEUE_MAX_RETRIES: failed replays before dead-lettering (default: 3)
    /// - HOSTAL_QUEUE_RETENTION_DAYS: age at which completed entries are pruned (default: 7)
    /// - HOSTAL_FACADE_TTL_MINUTES: cache lifetime of facade writes (default: one week)
    /// - HOSTAL_SNAPSHOT_TTL_MINUTES: lifetime of offline collection snapshots (default: one week)
    /// - HOSTAL_CLEAR_SESSION_ON_START: drop session credentials at startup (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let home = get("HOSTAL_HOME").map(PathBuf::from).unwrap_or_else(|| {
            get("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".hostal")
        });
        let mut config = Self::with_home(home);

        if let Some(name) = get("HOSTAL_DB_NAME") {
            if name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(ConfigError::InvalidDbName(name));
            }
            config.db_name = name;
        }

        if let Some(raw) = get("HOSTAL_QUEUE_MAX_RETRIES") {
            let retries = positive("HOSTAL_QUEUE_MAX_RETRIES", &raw, i64::from(u32::MAX))?;
            config.queue_max_retries =
                u32::try_from(retries).map_err(|_| ConfigError::InvalidNumber {
                    var: "HOSTAL_QUEUE_MAX_RETRIES",
                    value: raw,
                })?;
        }
        if let Some(raw) = get("HOSTAL_QUEUE_RETENTION_DAYS") {
            config.queue_retention_days =
                positive("HOSTAL_QUEUE_RETENTION_DAYS", &raw, MAX_RETENTION_DAYS)?;
        }
        if let Some(raw) = get("HOSTAL_FACADE_TTL_MINUTES") {
            config.facade_ttl_minutes =
                positive("HOSTAL_FACADE_TTL_MINUTES", &raw, MAX_TTL_MINUTES)?;
        }
        if let Some(raw) = get("HOSTAL_SNAPSHOT_TTL_MINUTES") {
            config.snapshot_ttl_minutes =
                positive("HOSTAL_SNAPSHOT_TTL_MINUTES", &raw, MAX_TTL_MINUTES)?;
        }
        if let Some(raw) = get("HOSTAL_CLEAR_SESSION_ON_START") {
            config.clear_session_on_start = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            );
        }

        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.home.join(format!("{}.db", self.db_name))
    }
}

fn positive(var: &'static str, raw: &str, max: i64) -> Result<i64, ConfigError> {
    let value: i64 = raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: raw.to_string(),
    })?;
    if value <= 0 {
        return Err(ConfigError::NotPositive { var });
    }
    if value > max {
        return Err(ConfigError::TooLarge { var, max });
    }
    Ok(value)
}
