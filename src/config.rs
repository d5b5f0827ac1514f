//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub stripe: StripeConfig,
    pub settlement: SettlementConfig,
    pub alerts: AlertConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
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

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment processor (Stripe) configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub base_url: String,
    pub request_timeout: u64, // seconds
}

/// Settlement engine tuning
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u32,
    /// Allowed |processor amount - ledger amount| in minor units
    pub amount_tolerance: i64,
    /// Upper bound on the whole remote-verification phase
    pub verification_timeout_secs: u64,
    /// Age after which an uncommitted `settling` claim is released back to
    /// `pending`, covering processes that died mid-settlement
    pub stale_claim_timeout_secs: i64,
    /// Age threshold for the failed-payment retention sweep
    pub cleanup_after_days: i64,
    pub cleanup_interval_secs: u64,
}

impl SettlementConfig {
    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_secs)
    }
}

/// Alert evaluation thresholds and scheduling
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub evaluation_interval_secs: u64,
    pub consecutive_failure_threshold: u64,
    pub error_rate_threshold: f64,
    pub error_rate_min_samples: u64,
    pub slow_settlement_threshold_ms: u64,
    pub oldest_pending_threshold_hours: i64,
    pub pending_volume_threshold: i64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            stripe: StripeConfig::from_env()?,
            settlement: SettlementConfig::from_env()?,
            alerts: AlertConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.stripe.validate()?;
        self.settlement.validate()?;
        self.alerts.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
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

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
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

impl StripeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(StripeConfig {
            secret_key: env::var("STRIPE_SECRET_KEY")
                .map_err(|_| ConfigError::MissingVariable("STRIPE_SECRET_KEY".to_string()))?,
            base_url: env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            request_timeout: env::var("STRIPE_REQUEST_TIMEOUT")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("STRIPE_REQUEST_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.is_empty() {
            return Err(ConfigError::InvalidValue("STRIPE_SECRET_KEY".to_string()));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "STRIPE_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "STRIPE_REQUEST_TIMEOUT".to_string(),
            ));
        }

        Ok(())
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SettlementConfig {
            max_retries: env::var("SETTLEMENT_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SETTLEMENT_MAX_RETRIES".to_string()))?,
            base_delay_ms: env::var("SETTLEMENT_BASE_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SETTLEMENT_BASE_DELAY_MS".to_string()))?,
            max_delay_ms: env::var("SETTLEMENT_MAX_DELAY_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SETTLEMENT_MAX_DELAY_MS".to_string()))?,
            backoff_multiplier: env::var("SETTLEMENT_BACKOFF_MULTIPLIER")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("SETTLEMENT_BACKOFF_MULTIPLIER".to_string())
                })?,
            amount_tolerance: env::var("SETTLEMENT_AMOUNT_TOLERANCE")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("SETTLEMENT_AMOUNT_TOLERANCE".to_string())
                })?,
            verification_timeout_secs: env::var("SETTLEMENT_VERIFICATION_TIMEOUT")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("SETTLEMENT_VERIFICATION_TIMEOUT".to_string())
                })?,
            stale_claim_timeout_secs: env::var("SETTLEMENT_STALE_CLAIM_TIMEOUT")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("SETTLEMENT_STALE_CLAIM_TIMEOUT".to_string())
                })?,
            cleanup_after_days: env::var("SETTLEMENT_CLEANUP_AFTER_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("SETTLEMENT_CLEANUP_AFTER_DAYS".to_string())
                })?,
            cleanup_interval_secs: env::var("SETTLEMENT_CLEANUP_INTERVAL")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("SETTLEMENT_CLEANUP_INTERVAL".to_string())
                })?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_multiplier == 0 {
            return Err(ConfigError::InvalidValue(
                "SETTLEMENT_BACKOFF_MULTIPLIER cannot be 0".to_string(),
            ));
        }

        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidValue(
                "SETTLEMENT_BASE_DELAY_MS must be <= SETTLEMENT_MAX_DELAY_MS".to_string(),
            ));
        }

        if self.amount_tolerance < 0 {
            return Err(ConfigError::InvalidValue(
                "SETTLEMENT_AMOUNT_TOLERANCE cannot be negative".to_string(),
            ));
        }

        if self.cleanup_after_days <= 0 {
            return Err(ConfigError::InvalidValue(
                "SETTLEMENT_CLEANUP_AFTER_DAYS must be positive".to_string(),
            ));
        }

        if self.stale_claim_timeout_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "SETTLEMENT_STALE_CLAIM_TIMEOUT must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            consecutive_failure_threshold: 3,
            error_rate_threshold: 0.05,
            error_rate_min_samples: 10,
            slow_settlement_threshold_ms: 10_000,
            oldest_pending_threshold_hours: 24,
            pending_volume_threshold: 100,
        }
    }
}

impl AlertConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AlertConfig {
            evaluation_interval_secs: env::var("ALERT_EVALUATION_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ALERT_EVALUATION_INTERVAL".to_string()))?,
            consecutive_failure_threshold: env::var("ALERT_CONSECUTIVE_FAILURES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ALERT_CONSECUTIVE_FAILURES".to_string()))?,
            error_rate_threshold: env::var("ALERT_ERROR_RATE")
                .unwrap_or_else(|_| "0.05".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ALERT_ERROR_RATE".to_string()))?,
            error_rate_min_samples: env::var("ALERT_ERROR_RATE_MIN_SAMPLES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("ALERT_ERROR_RATE_MIN_SAMPLES".to_string())
                })?,
            slow_settlement_threshold_ms: env::var("ALERT_SLOW_SETTLEMENT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ALERT_SLOW_SETTLEMENT_MS".to_string()))?,
            oldest_pending_threshold_hours: env::var("ALERT_OLDEST_PENDING_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ALERT_OLDEST_PENDING_HOURS".to_string()))?,
            pending_volume_threshold: env::var("ALERT_PENDING_VOLUME")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ALERT_PENDING_VOLUME".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(ConfigError::InvalidValue(
                "ALERT_ERROR_RATE must be between 0 and 1".to_string(),
            ));
        }

        if self.evaluation_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "ALERT_EVALUATION_INTERVAL cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}
