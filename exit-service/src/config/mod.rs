//! Configuration module for exit-service.

use crate::services::lifecycle::{ReviewPolicy, DEFAULT_CREDENTIAL_PREFIX};
use secrecy::Secret;
use service_core::config::{self as core_config, env_or};
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct ExitConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageBackend,
    pub database: Option<DatabaseConfig>,
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Credentials are `{prefix}-{uuid}-{millis}` and must fit a 100 character column.
pub const MAX_CREDENTIAL_PREFIX_LEN: usize = 40;

#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub hall_scoped: bool,
    pub allow_super_admin: bool,
    pub credential_prefix: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            hall_scoped: false,
            allow_super_admin: true,
            credential_prefix: DEFAULT_CREDENTIAL_PREFIX.to_string(),
        }
    }
}

impl ReviewConfig {
    /// Reject prefixes that are empty, too long or not URL-safe.
    pub fn validate(&self) -> Result<(), AppError> {
        let prefix = &self.credential_prefix;
        if prefix.is_empty() || prefix.len() > MAX_CREDENTIAL_PREFIX_LEN {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASS_CREDENTIAL_PREFIX must be 1 to {} characters",
                MAX_CREDENTIAL_PREFIX_LEN
            )));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASS_CREDENTIAL_PREFIX may only contain letters, digits, '-' and '_'"
            )));
        }
        Ok(())
    }

    pub fn policy(&self) -> ReviewPolicy {
        ReviewPolicy {
            hall_scoped: self.hall_scoped,
            allow_super_admin: self.allow_super_admin,
            credential_prefix: self.credential_prefix.clone(),
        }
    }
}

impl ExitConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let storage: StorageBackend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let database = match storage {
            StorageBackend::Postgres => Some(DatabaseConfig {
                url: Secret::new(env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2),
            }),
            StorageBackend::Memory => None,
        };

        let review = ReviewConfig {
            hall_scoped: env_or("REVIEW_HALL_SCOPED", false),
            allow_super_admin: env_or("REVIEW_ALLOW_SUPER_ADMIN", true),
            credential_prefix: env::var("PASS_CREDENTIAL_PREFIX")
                .unwrap_or_else(|_| DEFAULT_CREDENTIAL_PREFIX.to_string()),
        };
        review.validate()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "exit-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            storage,
            database,
            review,
        })
    }

    /// In-memory configuration on an ephemeral port, used by tests and demos.
    pub fn in_memory() -> Self {
        Self {
            common: core_config::Config {
                port: 0,
                host: "127.0.0.1".to_string(),
            },
            service_name: "exit-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            storage: StorageBackend::Memory,
            database: None,
            review: ReviewConfig::default(),
        }
    }
}
