//! Layered configuration loading and validation.

use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::infrastructure::logging::parse_log_level;

/// Config file read when no `--config` path is given.
pub const DEFAULT_CONFIG_PATH: &str = ".lis-reconciler/config.yaml";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Unknown log level name.
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// No database URL.
    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    /// Pool size below one.
    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    /// Retry count of zero.
    #[error("Invalid max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),

    /// Report worker concurrency below one.
    #[error("Invalid worker concurrency: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    /// Non-positive pathologist SLA.
    #[error("Invalid doctor_tat_minutes: {0}. Must be positive")]
    InvalidDoctorTat(i64),

    /// No LIS system id.
    #[error("lis_system_id cannot be empty")]
    EmptyLisSystemId,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. The YAML file at `path`, or `.lis-reconciler/config.yaml` (optional)
    /// 3. Environment variables (`LISREC_` prefix, `__` separates nested keys)
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("LISREC_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration (file: {})", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        if parse_log_level(&config.logging.level).is_err() {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }

        if config.worker.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(config.worker.concurrency));
        }
        if config.worker.report_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(config.worker.report_concurrency));
        }

        if config.approval.doctor_tat_minutes <= 0 {
            return Err(ConfigError::InvalidDoctorTat(config.approval.doctor_tat_minutes));
        }
        if config.approval.lis_system_id.trim().is_empty() {
            return Err(ConfigError::EmptyLisSystemId);
        }

        Ok(())
    }
}
