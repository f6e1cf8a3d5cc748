use config::{Config, ConfigError, Environment, File};
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
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.razorpay.com";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEV_GATEWAY_KEY_ID: &str = "rzp_test_development";
const DEV_GATEWAY_KEY_SECRET: &str = "development_gateway_key_secret";
const DEV_GATEWAY_WEBHOOK_SECRET: &str = "development_gateway_webhook_secret";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// HS256 secret used to verify staff bearer tokens
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

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

    /// Upper bound for a single HTTP request (seconds)
    #[serde(default = "default_request_timeout_secs")]
    #[validate(custom = "validate_positive_secs")]
    pub request_timeout_secs: u64,

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

    // ========== Payment Gateway ==========
    /// Base URL of the gateway's REST API
    #[serde(default = "default_gateway_base_url")]
    #[validate(url)]
    pub gateway_base_url: String,

    /// Public key id used for basic auth against the gateway
    #[validate(length(min = 1))]
    pub gateway_key_id: String,

    /// Key secret; also the HMAC key for client checkout signatures
    #[validate(length(min = 1))]
    pub gateway_key_secret: String,

    /// HMAC key for webhook deliveries
    #[validate(length(min = 1))]
    pub gateway_webhook_secret: String,

    /// Bound on gateway order creation (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(custom = "validate_positive_secs")]
    pub gateway_timeout_secs: u64,

    /// Currency used when a request omits one
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub default_currency: String,

    // ========== Notifications ==========
    /// When set, notifications are POSTed here instead of only being logged
    #[serde(default)]
    pub notification_webhook_url: Option<String>,

    /// HMAC key for the `X-Notification-Signature` header
    #[serde(default)]
    pub notification_webhook_secret: Option<String>,
}

impl AppConfig {
    /// Creates a configuration with development gateway credentials
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            request_timeout_secs: default_request_timeout_secs(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            gateway_base_url: default_gateway_base_url(),
            gateway_key_id: DEV_GATEWAY_KEY_ID.to_string(),
            gateway_key_secret: DEV_GATEWAY_KEY_SECRET.to_string(),
            gateway_webhook_secret: DEV_GATEWAY_WEBHOOK_SECRET.to_string(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            default_currency: default_currency(),
            notification_webhook_url: None,
            notification_webhook_secret: None,
        }
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() {
            let dev_secrets = [
                ("gateway_key_id", self.gateway_key_id.as_str(), DEV_GATEWAY_KEY_ID),
                (
                    "gateway_key_secret",
                    self.gateway_key_secret.as_str(),
                    DEV_GATEWAY_KEY_SECRET,
                ),
                (
                    "gateway_webhook_secret",
                    self.gateway_webhook_secret.as_str(),
                    DEV_GATEWAY_WEBHOOK_SECRET,
                ),
            ];
            for (field, value, dev_default) in dev_secrets {
                if value.trim() == dev_default {
                    let mut err = ValidationError::new("gateway_secret_default_dev");
                    err.message = Some(
                        "Development gateway credentials must not be used outside development."
                            .into(),
                    );
                    errors.add(field, err);
                }
            }
        }

        if self.notification_webhook_url.is_some()
            && self
                .notification_webhook_secret
                .as_deref()
                .map(str::is_empty)
                .unwrap_or(true)
        {
            let mut err = ValidationError::new("notification_webhook_secret_required");
            err.message =
                Some("APP__NOTIFICATION_WEBHOOK_SECRET is required when a URL is set".into());
            errors.add("notification_webhook_secret", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
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

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_currency() -> String {
    "INR".to_string()
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

fn validate_positive_secs(secs: u64) -> Result<(), ValidationError> {
    if secs == 0 {
        let mut err = ValidationError::new("timeout_secs");
        err.message = Some("Timeouts must be greater than 0 seconds".into());
        return Err(err);
    }
    Ok(())
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("consultancy_payments={},tower_http=debug", level);
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
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://payments.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?;

    // Gateway credentials only have defaults for local development.
    if run_env.eq_ignore_ascii_case(DEFAULT_ENV) {
        builder = builder
            .set_default("gateway_key_id", DEV_GATEWAY_KEY_ID)?
            .set_default("gateway_key_secret", DEV_GATEWAY_KEY_SECRET)?
            .set_default("gateway_webhook_secret", DEV_GATEWAY_WEBHOOK_SECRET)?;
    }

    let config = builder
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET environment variable with a secure random string (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a_long_enough_staff_jwt_secret_for_tests_0123".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn base_config_passes_field_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let mut cfg = base_config();
        cfg.gateway_key_id = "rzp_live_abc".into();
        cfg.gateway_key_secret = "live_secret".into();
        cfg.gateway_webhook_secret = "live_webhook".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.cors_allowed_origins = Some("https://example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_rejects_development_gateway_secrets() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.errors().contains_key("gateway_key_secret"));
        assert!(errors.errors().contains_key("gateway_webhook_secret"));
    }

    #[test]
    fn development_accepts_bundled_gateway_secrets() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn notification_url_requires_secret() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.notification_webhook_url = Some("https://hooks.example.com/notify".into());
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.notification_webhook_secret = Some("notify-secret".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn zero_gateway_timeout_is_rejected() {
        let mut cfg = base_config();
        cfg.gateway_timeout_secs = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("gateway_timeout_secs"));
    }

    #[test]
    fn timeouts_are_checked_by_value() {
        let mut cfg = base_config();
        cfg.request_timeout_secs = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("request_timeout_secs"));

        cfg.request_timeout_secs = 1;
        cfg.gateway_timeout_secs = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn short_or_weak_jwt_secret_is_rejected() {
        let mut cfg = base_config();
        cfg.jwt_secret = "short".into();
        assert!(cfg.validate().is_err());

        cfg.jwt_secret = "a".repeat(40);
        assert!(cfg.validate().is_err());
    }
}
