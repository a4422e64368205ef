use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const MAX_LOCK_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_NOTIFY_BUFFER: usize = 256;

/// Where committed changes are announced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyBackend {
    /// In-process tokio broadcast channel.
    #[default]
    Broadcast,
    /// Postgres `pg_notify`.
    PgNotify,
    Disabled,
}

/// Ledger service configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Deployment environment name
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Longest a ledger operation waits for a container row lock
    #[serde(default = "default_lock_timeout_ms")]
    #[validate(custom = "validate_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Notification transport
    #[serde(default)]
    pub notify_backend: NotifyBackend,

    /// Broadcast channel capacity
    #[serde(default = "default_notify_buffer")]
    #[validate(range(min = 1))]
    pub notify_buffer: usize,
}

impl LedgerConfig {
    /// Configuration with defaults for everything but the database URL.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
            notify_backend: NotifyBackend::default(),
            notify_buffer: default_notify_buffer(),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
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

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_notify_buffer() -> usize {
    DEFAULT_NOTIFY_BUFFER
}

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

fn validate_lock_timeout_ms(value: u64) -> Result<(), ValidationError> {
    if value == 0 || value > MAX_LOCK_TIMEOUT_MS {
        let mut err = ValidationError::new("lock_timeout_ms");
        err.message = Some(
            format!("lock_timeout_ms must be between 1 and {}", MAX_LOCK_TIMEOUT_MS).into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter.
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("nutrient_ledger={},sea_orm=warn,sqlx=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads configuration from `config/` and the environment.
///
/// Sources, later ones winning:
/// 1. Built-in defaults
/// 2. `config/default.toml`
/// 3. `config/{APP_ENV}.toml`
/// 4. Environment variables (`APP__LOCK_TIMEOUT_MS`, ...)
pub fn load_config() -> Result<LedgerConfig, ConfigLoadError> {
    load_config_from(Path::new(CONFIG_DIR))
}

pub fn load_config_from(dir: &Path) -> Result<LedgerConfig, ConfigLoadError> {
    let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let config = Config::builder()
        .set_default("database_url", "sqlite://nutrient_ledger.db?mode=rwc")?
        .set_default("environment", run_env.as_str())?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let ledger_config: LedgerConfig = config.try_deserialize()?;

    ledger_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        ConfigLoadError::Validation(e)
    })?;

    info!(
        environment = %ledger_config.environment,
        notify_backend = ?ledger_config.notify_backend,
        lock_timeout_ms = ledger_config.lock_timeout_ms,
        "Configuration loaded"
    );
    Ok(ledger_config)
}
