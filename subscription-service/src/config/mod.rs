//! Configuration module for subscription-service.

use crate::models::PageLimits;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub repository: RepositoryConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub page_limits: PageLimits,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Deadline for a single request; the operation is cancelled when it passes.
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl SubscriptionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build the config from `common` and a variable lookup.
    pub fn from_lookup<L>(common: core_config::Config, lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let default_page_size: i64 = parse_or(&lookup, "REPO_DEFAULT_PAGE_SIZE", 10)?;
        let max_page_size: i64 = parse_or(&lookup, "REPO_MAX_PAGE_SIZE", 100)?;
        let page_limits = PageLimits::new(default_page_size, max_page_size)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        Ok(Self {
            common,
            service_name: lookup("SERVICE_NAME")
                .unwrap_or_else(|| "subscription-service".to_string()),
            service_version: lookup("SERVICE_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            otlp_endpoint: lookup("OTLP_ENDPOINT").filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").map(Secret::new).ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 20)?,
                min_connections: parse_or(&lookup, "DATABASE_MIN_CONNECTIONS", 2)?,
                acquire_timeout_secs: parse_or(&lookup, "DATABASE_ACQUIRE_TIMEOUT_SECS", 30)?,
                idle_timeout_secs: parse_or(&lookup, "DATABASE_IDLE_TIMEOUT_SECS", 300)?,
            },
            repository: RepositoryConfig { page_limits },
            app: AppConfig {
                request_timeout: Duration::from_millis(parse_or(&lookup, "APP_TIMEOUT_MS", 5000)?),
                shutdown_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "APP_SHUTDOWN_TIMEOUT_SECS",
                    10,
                )?),
            },
        })
    }
}

/// Parse `key` if set, otherwise use `default`. A set but unparsable value is an error.
fn parse_or<T, L>(lookup: &L, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("invalid {}={:?}: {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
