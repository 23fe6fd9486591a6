use config::{Config, ConfigError, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_TAX_RATE: f64 = 0.10;
const DEFAULT_CURRENCY: &str = "IDR";
const DEFAULT_PAYMENT_PROVIDER: &str = "sandbox";
const DEFAULT_XENDIT_BASE_URL: &str = "https://api.xendit.co";
const DEFAULT_QR_CHANNEL_CODE: &str = "DANA";
const DEFAULT_PAYMENT_REQUEST_EXPIRY_MINUTES: i64 = 15;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WEBHOOK_HEADER: &str = "x-callback-token";
const MIN_WEBHOOK_TOKEN_LEN: usize = 16;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Tax rate applied to every order subtotal (as decimal, e.g., 0.10 for 10%)
    #[serde(default = "default_tax_rate")]
    #[validate(custom = "validate_tax_rate")]
    pub tax_rate: f64,

    /// ISO currency code sent to the payment gateway
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,

    /// Payment provider identifier ("xendit" or "sandbox")
    #[serde(default = "default_payment_provider")]
    #[validate(custom = "validate_payment_provider")]
    pub payment_provider: String,

    /// Xendit secret API key (required when payment_provider = "xendit")
    #[serde(default)]
    pub xendit_secret_key: Option<String>,

    /// Xendit API base URL
    #[serde(default = "default_xendit_base_url")]
    pub xendit_base_url: String,

    /// QR channel used for payment requests
    #[serde(default = "default_qr_channel_code")]
    pub qr_channel_code: String,

    /// Lifetime of an issued QR payment request
    #[serde(default = "default_payment_request_expiry_minutes")]
    #[validate(range(min = 1, max = 1440))]
    pub payment_request_expiry_minutes: i64,

    /// Network timeout for gateway calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Shared secret the gateway sends with every payment callback
    #[serde(default)]
    pub payment_webhook_token: Option<String>,

    /// Header carrying the payment callback token
    #[serde(default = "default_webhook_header")]
    pub payment_webhook_header: String,

    /// Expose the simulate-payment endpoint (sandbox / test mode only)
    #[serde(default)]
    pub payment_simulation_enabled: bool,
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            tax_rate: default_tax_rate(),
            currency: default_currency(),
            payment_provider: default_payment_provider(),
            xendit_secret_key: None,
            xendit_base_url: default_xendit_base_url(),
            qr_channel_code: default_qr_channel_code(),
            payment_request_expiry_minutes: default_payment_request_expiry_minutes(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            payment_webhook_token: None,
            payment_webhook_header: default_webhook_header(),
            payment_simulation_enabled: false,
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Tax rate as an exact decimal
    pub fn tax_rate_decimal(&self) -> Decimal {
        Decimal::from_f64(self.tax_rate)
            .map(|rate| rate.round_dp(6).normalize())
            .unwrap_or_default()
    }

    pub fn payment_request_expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.payment_request_expiry_minutes)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.payment_provider.eq_ignore_ascii_case("xendit")
            && self
                .xendit_secret_key
                .as_deref()
                .map_or(true, |key| key.trim().is_empty())
        {
            let mut err = ValidationError::new("xendit_secret_key");
            err.message = Some("xendit_secret_key is required when payment_provider = xendit".into());
            errors.add("xendit_secret_key", err);
        }

        if let Some(token) = &self.payment_webhook_token {
            if token.trim().len() < MIN_WEBHOOK_TOKEN_LEN {
                let mut err = ValidationError::new("payment_webhook_token");
                err.message = Some(
                    format!(
                        "payment_webhook_token must be at least {} characters",
                        MIN_WEBHOOK_TOKEN_LEN
                    )
                    .into(),
                );
                errors.add("payment_webhook_token", err);
            }
        } else if self.is_production() {
            let mut err = ValidationError::new("payment_webhook_token");
            err.message = Some("payment_webhook_token must be configured in production".into());
            errors.add("payment_webhook_token", err);
        }

        if self.is_production() && self.payment_simulation_enabled {
            let mut err = ValidationError::new("payment_simulation_enabled");
            err.message = Some("payment simulation cannot be enabled in production".into());
            errors.add("payment_simulation_enabled", err);
        }

        if !self.is_development()
            && !self.cors_allow_any_origin
            && self
                .cors_allowed_origins
                .as_deref()
                .map_or(true, |origins| origins.trim().is_empty())
        {
            let mut err = ValidationError::new("cors_allowed_origins");
            err.message = Some(
                "Set cors_allowed_origins or cors_allow_any_origin outside development".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_tax_rate() -> f64 {
    DEFAULT_TAX_RATE
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_payment_provider() -> String {
    DEFAULT_PAYMENT_PROVIDER.to_string()
}

fn default_xendit_base_url() -> String {
    DEFAULT_XENDIT_BASE_URL.to_string()
}

fn default_qr_channel_code() -> String {
    DEFAULT_QR_CHANNEL_CODE.to_string()
}

fn default_payment_request_expiry_minutes() -> i64 {
    DEFAULT_PAYMENT_REQUEST_EXPIRY_MINUTES
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_webhook_header() -> String {
    DEFAULT_WEBHOOK_HEADER.to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_tax_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        let mut err = ValidationError::new("tax_rate");
        err.message = Some("tax_rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_payment_provider(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "xendit" | "sandbox" => Ok(()),
        _ => {
            let mut err = ValidationError::new("payment_provider");
            err.message = Some("Must be one of: xendit, sandbox".into());
            Err(err)
        }
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("pos_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] with an explicit config directory
pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://pos.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if app_config.payment_webhook_token.is_none() {
        tracing::warn!("payment_webhook_token is not configured; every payment webhook will be rejected");
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}
