//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::payments::factory::ProviderFactoryConfig;
use crate::payments::types::ProviderName;
use crate::workflows::{SettlementConfig, StepRetryPolicy};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub provider: ProviderConfig,
    pub settlement: SettlementConfig,
    pub idempotency: IdempotencyConfig,
    /// Run with in-memory adapters instead of Postgres and Redis
    pub skip_externals: bool,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Charge provider selection plus webhook verification
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub factory: ProviderFactoryConfig,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub ttl_hours: i64,
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = flag("SKIP_EXTERNALS", false);
        let database = if skip_externals {
            DatabaseConfig::from_env().unwrap_or_else(|_| DatabaseConfig::unused())
        } else {
            DatabaseConfig::from_env()?
        };

        Ok(AppConfig {
            database,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            provider: ProviderConfig::from_env()?,
            settlement: SettlementConfig::from_env()?,
            idempotency: IdempotencyConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.skip_externals {
            self.database.validate()?;
            self.cache.validate()?;
        }
        self.logging.validate()?;
        self.provider.validate()?;
        self.settlement.validate()?;
        self.idempotency.validate()?;

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    fn unused() -> Self {
        DatabaseConfig {
            url: String::new(),
            max_connections: 20,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            max_connections: parse_var("CACHE_MAX_CONNECTIONS", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }

        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("CACHE_MAX_CONNECTIONS".to_string()));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let factory = ProviderFactoryConfig::from_env()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        Ok(ProviderConfig {
            factory,
            webhook_secret: env::var("PROVIDER_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.factory.provider != ProviderName::MercadoPago {
            return Ok(());
        }

        let mp = &self.factory.mercado_pago;
        if mp.access_token.trim().is_empty() {
            return Err(ConfigError::MissingVariable(
                "PROVIDER_ACCESS_TOKEN".to_string(),
            ));
        }

        if !mp.base_url.starts_with("http://") && !mp.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PROVIDER_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if mp.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("PROVIDER_TIMEOUT_MS".to_string()));
        }

        if mp.max_retries == 0 {
            return Err(ConfigError::InvalidValue("PROVIDER_MAX_RETRIES".to_string()));
        }

        Ok(())
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SettlementConfig {
            poll_interval: Duration::from_secs(parse_var("SETTLEMENT_POLL_INTERVAL_SECS", "30")?),
            max_polls: parse_var("SETTLEMENT_MAX_POLLS", "30")?,
            poll_provider: flag("SETTLEMENT_POLL_PROVIDER", true),
            step_retry: StepRetryPolicy::default(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "SETTLEMENT_POLL_INTERVAL_SECS".to_string(),
            ));
        }

        if self.max_polls == 0 {
            return Err(ConfigError::InvalidValue("SETTLEMENT_MAX_POLLS".to_string()));
        }

        Ok(())
    }
}

impl IdempotencyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(IdempotencyConfig {
            ttl_hours: parse_var("IDEMPOTENCY_TTL_HOURS", "24")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue(
                "IDEMPOTENCY_TTL_HOURS must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}
