//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Rate limit: requests per minute per API key
    pub rate_limit_per_minute: i32,

    /// How long a stored idempotent response is replayed
    pub idempotency_ttl_hours: i64,

    /// Apply embedded migrations at startup
    pub run_migrations: bool,

    /// Start the maintenance job scheduler
    pub jobs_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_or("PORT", 3000)?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            rate_limit_per_minute: parse_or("RATE_LIMIT_PER_MINUTE", 100)?,
            idempotency_ttl_hours: parse_or("IDEMPOTENCY_TTL_HOURS", 24)?,
            run_migrations: parse_or("RUN_MIGRATIONS", false)?,
            jobs_enabled: parse_or("JOBS_ENABLED", true)?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Read an optional variable, falling back to `default` when unset.
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_default_when_unset() {
        let value: u16 = parse_or("RESELLER_LEDGER_TEST_UNSET_PORT", 4242).unwrap();
        assert_eq!(value, 4242);
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        env::set_var("RESELLER_LEDGER_TEST_BAD_BOOL", "maybe");
        let result: Result<bool, _> = parse_or("RESELLER_LEDGER_TEST_BAD_BOOL", false);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue("RESELLER_LEDGER_TEST_BAD_BOOL"))
        ));
    }

    #[test]
    fn test_parse_or_reads_value() {
        env::set_var("RESELLER_LEDGER_TEST_TTL", " 48 ");
        let ttl: i64 = parse_or("RESELLER_LEDGER_TEST_TTL", 24).unwrap();
        assert_eq!(ttl, 48);
    }
}
