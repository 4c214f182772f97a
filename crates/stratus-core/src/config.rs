//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Billing-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Hard ceiling on customer lock acquisition, in milliseconds.
    /// Exceeding it surfaces a retryable "customer busy" error.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Acquisitions slower than this (but under the hard timeout) are
    /// logged for capacity monitoring without failing the call.
    #[serde(default = "default_lock_warn_threshold")]
    pub lock_warn_threshold_ms: u64,

    /// Maximum automatic retry attempts for a failed invoice
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: i32,

    /// Minimum spacing between automatic retries, in hours
    #[serde(default = "default_retry_interval_hours")]
    pub retry_interval_hours: i64,
}

fn default_lock_timeout() -> u64 {
    10_000
}

fn default_lock_warn_threshold() -> u64 {
    1_500
}

fn default_max_retry_attempts() -> i32 {
    3
}

fn default_retry_interval_hours() -> i64 {
    24
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 20)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("billing.lock_timeout_ms", 10_000)?
            .set_default("billing.lock_warn_threshold_ms", 1_500)?
            .set_default("billing.max_retry_attempts", 3)?
            .set_default("billing.retry_interval_hours", 24)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with STRATUS_ prefix
            .add_source(
                Environment::with_prefix("STRATUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("STRATUS").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
            lock_warn_threshold_ms: 1_500,
            max_retry_attempts: 3,
            retry_interval_hours: 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_billing_config() {
        let config = BillingConfig::default();
        assert_eq!(config.lock_timeout_ms, 10_000);
        assert_eq!(config.max_retry_attempts, 3);
        assert!(config.lock_warn_threshold_ms < config.lock_timeout_ms);
    }
}
