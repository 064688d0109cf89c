//! Configuration loaded from the environment at startup.
//!
//! A `.env` file in the working directory is honoured for local development,
//! except in test builds so tests stay hermetic.
use crate::error::ConfigError;
use chrono::{FixedOffset, Offset, Utc};
use std::path::PathBuf;
use tracing::Level;

#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: PathBuf,
    /// Offset used to turn instants into the service's calendar days.
    pub utc_offset: FixedOffset,
    pub log_level: Level,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup, `std::env::var` in production.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("LEDGER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./learning-ledger.db"));

        let offset_str = lookup("LEDGER_UTC_OFFSET_MINUTES").unwrap_or_else(|| "0".to_string());
        let offset_minutes = offset_str.trim().parse::<i32>().map_err(|e| {
            ConfigError::InvalidValue("LEDGER_UTC_OFFSET_MINUTES".to_string(), e.to_string())
        })?;
        let utc_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "LEDGER_UTC_OFFSET_MINUTES".to_string(),
                    format!("{offset_minutes} is outside -1439..=1439"),
                )
            })?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{log_level_str}' is not a valid log level"),
            )
        })?;

        Ok(Self {
            db_path,
            utc_offset,
            log_level,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./learning-ledger.db"),
            utc_offset: Utc.fix(),
            log_level: Level::INFO,
        }
    }
}
