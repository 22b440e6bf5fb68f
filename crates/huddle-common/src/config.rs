//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > huddle.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup. Library crates never read the
/// global; the binary hands them the pieces they need.
pub fn init(path: Option<&str>) -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let app_config = load(path)?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build a configuration without touching the global, optionally from an
/// explicit file path instead of `huddle.toml` in the working directory.
pub fn load(path: Option<&str>) -> Result<AppConfig, config::ConfigError> {
    let file = match path {
        Some(p) => config::File::with_name(p).required(true),
        None => config::File::with_name("huddle").required(false),
    };

    config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 3000)?
        .set_default("database.url", "sqlite://huddle.db?mode=rwc")?
        .set_default("database.max_connections", 5)?
        .set_default("calls.invite_ttl_secs", 60)?
        .set_default("calls.sweep_interval_secs", 15)?
        .set_default("limits.max_message_length", 2000)?
        .add_source(file)
        // Environment variables (HUDDLE__SERVER__PORT, HUDDLE__AUTH__JWT_SECRET, etc.)
        .add_source(
            config::Environment::with_prefix("HUDDLE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub calls: CallsConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret (HS256), shared with the login service
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CallsConfig {
    /// How long a call invitation may ring before the server expires it
    pub invite_ttl_secs: u64,
    /// How often the invitation sweeper runs
    pub sweep_interval_secs: u64,
}

impl CallsConfig {
    pub fn invite_ttl(&self) -> Duration {
        Duration::from_secs(self.invite_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_message_length: usize,
}
