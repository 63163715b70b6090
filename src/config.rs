//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub payments: PaymentRuntimeConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    /// Run without Postgres, backed by the in-memory stores.
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

/// Process-wide knobs for the payment core that are not per-gateway credentials.
#[derive(Debug, Clone)]
pub struct PaymentRuntimeConfig {
    /// Public base URL gateways call back into, e.g. `https://api.example.com`.
    pub public_base_url: String,
    pub request_timeout: Duration,
    pub config_cache_ttl: Duration,
    pub alert_queue_capacity: usize,
    /// Accept a signed notification's own fields when the provider status API is down.
    pub trust_payload_on_verify_failure: bool,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let server = ServerConfig::from_env()?;
        let database = if server.skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server,
            database,
            logging: LoggingConfig::from_env()?,
            payments: PaymentRuntimeConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.payments.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            skip_externals: parse_bool_var("SKIP_EXTERNALS", false)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
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

impl Default for PaymentRuntimeConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout: Duration::from_secs(30),
            config_cache_ttl: Duration::from_secs(60),
            alert_queue_capacity: 256,
            trust_payload_on_verify_failure: true,
        }
    }
}

impl PaymentRuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(PaymentRuntimeConfig {
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or(defaults.public_base_url)
                .trim_end_matches('/')
                .to_string(),
            request_timeout: Duration::from_secs(
                env::var("PAYMENT_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| defaults.request_timeout.as_secs().to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PAYMENT_TIMEOUT_SECONDS".to_string()))?,
            ),
            config_cache_ttl: Duration::from_secs(
                env::var("GATEWAY_CONFIG_CACHE_TTL_SECS")
                    .unwrap_or_else(|_| defaults.config_cache_ttl.as_secs().to_string())
                    .parse()
                    .map_err(|_| {
                        ConfigError::InvalidValue("GATEWAY_CONFIG_CACHE_TTL_SECS".to_string())
                    })?,
            ),
            alert_queue_capacity: env::var("ALERT_QUEUE_CAPACITY")
                .unwrap_or_else(|_| defaults.alert_queue_capacity.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ALERT_QUEUE_CAPACITY".to_string()))?,
            trust_payload_on_verify_failure: parse_bool_var(
                "TRUST_WEBHOOK_PAYLOAD_ON_VERIFY_FAILURE",
                defaults.trust_payload_on_verify_failure,
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.public_base_url.starts_with("http://") && !self.public_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "PUBLIC_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_TIMEOUT_SECONDS".to_string(),
            ));
        }

        if self.alert_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("ALERT_QUEUE_CAPACITY".to_string()));
        }

        Ok(())
    }

    /// Callback URL a gateway should post its notifications to.
    pub fn webhook_url(&self, gateway: &str) -> String {
        format!("{}/webhooks/{}", self.public_base_url, gateway)
    }
}

fn parse_bool_var(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue(name.to_string())),
        },
        Err(_) => Ok(default),
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
