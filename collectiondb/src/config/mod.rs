use crate::error::{CollectionDbError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const VALIDATION_ENV: &str = "COLLECTION_VALIDATION";
pub const DATABASE_PATH_ENV: &str = "COLLECTIONDB_PATH";
pub const LARGE_TEXT_THRESHOLD_ENV: &str = "LARGE_TEXT_THRESHOLD";
pub const BUSY_TIMEOUT_ENV: &str = "COLLECTIONDB_BUSY_TIMEOUT_MS";

const DEFAULT_DATABASE_PATH: &str = "collections.db";
const DEFAULT_LARGE_TEXT_THRESHOLD: usize = 500;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Whether a schema violation rejects a write or is only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    #[default]
    On,
    Off,
}

impl ValidationMode {
    /// Read `COLLECTION_VALIDATION` from the environment. Called per request by
    /// adapters; the core never consults the environment on its own.
    pub fn from_env() -> Result<Self> {
        match std::env::var(VALIDATION_ENV) {
            Ok(raw) => raw.parse(),
            Err(_) => Ok(ValidationMode::default()),
        }
    }
}

impl FromStr for ValidationMode {
    type Err = CollectionDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(ValidationMode::On),
            "off" => Ok(ValidationMode::Off),
            other => Err(CollectionDbError::Config(format!(
                "{VALIDATION_ENV} must be 'on' or 'off', got '{other}'"
            ))),
        }
    }
}

/// Process configuration for a [`crate::Store`].
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    /// Default mode for adapters that do not read it per request.
    pub validation: ValidationMode,
    /// String fields longer than this (and not already Markdown) trigger the
    /// formatting hint on insert.
    pub large_text_threshold: usize,
    pub busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            validation: ValidationMode::On,
            large_text_threshold: DEFAULT_LARGE_TEXT_THRESHOLD,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl Config {
    /// Build a configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = lookup(DATABASE_PATH_ENV) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(mode) = lookup(VALIDATION_ENV) {
            config.validation = mode.parse()?;
        }
        if let Some(threshold) = lookup(LARGE_TEXT_THRESHOLD_ENV) {
            config.large_text_threshold = threshold.trim().parse().map_err(|_| {
                CollectionDbError::Config(format!(
                    "{LARGE_TEXT_THRESHOLD_ENV} must be a positive integer, got '{threshold}'"
                ))
            })?;
        }
        if let Some(timeout) = lookup(BUSY_TIMEOUT_ENV) {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                CollectionDbError::Config(format!(
                    "{BUSY_TIMEOUT_ENV} must be a number of milliseconds, got '{timeout}'"
                ))
            })?;
            config.busy_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }
}
