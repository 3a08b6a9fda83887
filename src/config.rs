use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "INR";

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Shared secret for verifying gateway capture signatures.
    /// Held only by the server; never logged or echoed.
    #[validate(length(min = 16))]
    pub gateway_secret: String,

    /// Base URL of the payment gateway's intent-creation endpoint.
    /// When absent, the in-process sandbox gateway is used.
    #[serde(default)]
    pub gateway_url: Option<String>,

    /// ISO 4217 currency code used for intents
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Bounded retry budget for conditional stock updates
    #[serde(default = "default_stock_retries")]
    pub stock_commit_retries: u32,

    /// Server bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment name: development, test, production
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Run embedded migrations on startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    /// Database pool sizing
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_stock_retries() -> u32 {
    3
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}

impl AppConfig {
    /// Constructs a configuration programmatically; used by tests and tools.
    pub fn new(database_url: String, gateway_secret: String, host: String, port: u16) -> Self {
        Self {
            database_url,
            gateway_secret,
            gateway_url: None,
            currency: default_currency(),
            stock_commit_retries: default_stock_retries(),
            host,
            port,
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: default_max_connections(),
            db_min_connections: default_min_connections(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads configuration from `config/default`, `config/<env>`, then
/// `APP__*` environment variables, in increasing precedence.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on defaults and environment variables",
            CONFIG_DIR
        );
    }

    // gateway_secret has no default: it must come from a config file or
    // APP__GATEWAY_SECRET so an insecure placeholder never reaches production.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    Ok(app_config)
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmatic_config_validates() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_gateway_secret_0123456789".to_string(),
            "127.0.0.1".to_string(),
            18080,
        );
        assert!(cfg.validate().is_ok());
        assert!(!cfg.is_production());
        assert_eq!(cfg.currency, "INR");
        assert_eq!(cfg.stock_commit_retries, 3);
    }

    #[test]
    fn short_gateway_secret_is_rejected() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "short".to_string(),
            "127.0.0.1".to_string(),
            18080,
        );
        assert!(cfg.validate().is_err());
    }
}
