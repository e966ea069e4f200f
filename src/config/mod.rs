//! Configuration management
//!
//! This module handles loading and parsing configuration for the AI tutor backend.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

/// Placeholder secret shipped with the defaults; startup warns while it is in use.
pub const DEFAULT_SECRET_KEY: &str = "change-me-in-production";

/// Placeholder API key found in sample `.env` files; treated as "not configured".
pub const PLACEHOLDER_API_KEY: &str = "your-openai-api-key-here";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Language model configuration
    #[serde(default)]
    pub ai: AiConfig,
    /// Application metadata
    #[serde(default)]
    pub app: AppConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:8501".to_string(),
        "http://localhost:3000".to_string(),
    ]
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/ai_tutor.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Key used to digest access tokens before they are stored
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    /// Lifetime of an access token in minutes
    #[serde(default = "default_token_expire_minutes")]
    pub access_token_expire_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
            access_token_expire_minutes: default_token_expire_minutes(),
        }
    }
}

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

fn default_token_expire_minutes() -> i64 {
    24 * 60
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// API key for the chat-completions endpoint; empty disables AI features
    #[serde(default)]
    pub api_key: String,
    /// Model name sent with every request
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Maximum tokens in a completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Request timeout in seconds
    #[serde(default = "default_ai_timeout")]
    pub timeout_seconds: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_seconds: default_ai_timeout(),
        }
    }
}

impl AiConfig {
    /// Whether a usable API key is configured
    pub fn is_configured(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && key != PLACEHOLDER_API_KEY
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_ai_timeout() -> u64 {
    30
}

/// Application metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Display name used by the root endpoint
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Reported version
    #[serde(default = "default_app_version")]
    pub version: String,
    /// Debug mode
    #[serde(default)]
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
            debug: false,
        }
    }
}

fn default_app_name() -> String {
    "AI Tutor Backend".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level for the crate and tower_http when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    /// Filter directive used when RUST_LOG is not set
    pub fn filter_directive(&self) -> String {
        let level = self.level.to_lowercase();
        format!("ai_tutor={},tower_http={}", level, level)
    }
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern `AI_TUTOR_<SECTION>_<FIELD>`:
    /// - AI_TUTOR_SERVER_HOST, AI_TUTOR_SERVER_PORT, AI_TUTOR_SERVER_CORS_ORIGINS
    /// - AI_TUTOR_DATABASE_DRIVER, AI_TUTOR_DATABASE_URL
    /// - AI_TUTOR_AUTH_SECRET_KEY, AI_TUTOR_AUTH_ACCESS_TOKEN_EXPIRE_MINUTES
    /// - AI_TUTOR_AI_API_KEY, AI_TUTOR_AI_MODEL, AI_TUTOR_AI_BASE_URL,
    ///   AI_TUTOR_AI_MAX_TOKENS, AI_TUTOR_AI_TEMPERATURE, AI_TUTOR_AI_TIMEOUT_SECONDS
    /// - AI_TUTOR_APP_NAME, AI_TUTOR_APP_DEBUG
    /// - AI_TUTOR_LOGGING_LEVEL
    ///
    /// The conventional `DATABASE_URL`, `SECRET_KEY` and `OPENAI_API_KEY`
    /// are honoured too; the prefixed form wins when both are set.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Unprefixed variables first so the prefixed ones take precedence
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.set_database_url(url);
        }
        if let Ok(secret) = std::env::var("SECRET_KEY") {
            self.auth.secret_key = secret;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.ai.api_key = key;
        }

        // Server configuration
        if let Ok(host) = std::env::var("AI_TUTOR_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("AI_TUTOR_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(origins) = std::env::var("AI_TUTOR_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = parse_origin_list(&origins);
        }

        // Database configuration
        if let Ok(driver) = std::env::var("AI_TUTOR_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {}
            }
        }
        if let Ok(url) = std::env::var("AI_TUTOR_DATABASE_URL") {
            self.set_database_url(url);
        }

        // Auth configuration
        if let Ok(secret) = std::env::var("AI_TUTOR_AUTH_SECRET_KEY") {
            self.auth.secret_key = secret;
        }
        if let Ok(minutes) = std::env::var("AI_TUTOR_AUTH_ACCESS_TOKEN_EXPIRE_MINUTES") {
            if let Ok(minutes) = minutes.parse::<i64>() {
                self.auth.access_token_expire_minutes = minutes;
            }
        }

        // AI configuration
        if let Ok(key) = std::env::var("AI_TUTOR_AI_API_KEY") {
            self.ai.api_key = key;
        }
        if let Ok(model) = std::env::var("AI_TUTOR_AI_MODEL") {
            self.ai.model = model;
        }
        if let Ok(base_url) = std::env::var("AI_TUTOR_AI_BASE_URL") {
            self.ai.base_url = base_url;
        }
        if let Ok(max_tokens) = std::env::var("AI_TUTOR_AI_MAX_TOKENS") {
            if let Ok(max_tokens) = max_tokens.parse::<u32>() {
                self.ai.max_tokens = max_tokens;
            }
        }
        if let Ok(temperature) = std::env::var("AI_TUTOR_AI_TEMPERATURE") {
            if let Ok(temperature) = temperature.parse::<f32>() {
                self.ai.temperature = temperature;
            }
        }
        if let Ok(timeout) = std::env::var("AI_TUTOR_AI_TIMEOUT_SECONDS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.ai.timeout_seconds = timeout;
            }
        }

        // App and logging
        if let Ok(name) = std::env::var("AI_TUTOR_APP_NAME") {
            self.app.name = name;
        }
        if let Ok(debug) = std::env::var("AI_TUTOR_APP_DEBUG") {
            self.app.debug = matches!(debug.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(level) = std::env::var("AI_TUTOR_LOGGING_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Set the database URL, switching to MySQL for `mysql://` URLs
    fn set_database_url(&mut self, url: String) {
        if url.starts_with("mysql://") {
            self.database.driver = DatabaseDriver::Mysql;
        }
        self.database.url = url;
    }

    /// Check values that would make the server unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.secret_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.secret_key must not be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be greater than 0".to_string(),
            ));
        }
        if self.auth.access_token_expire_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.access_token_expire_minutes must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "ai.temperature must be between 0.0 and 2.0, got {}",
                self.ai.temperature
            )));
        }
        Ok(())
    }

    /// Whether the shipped placeholder secret is still configured
    pub fn uses_default_secret(&self) -> bool {
        self.auth.secret_key == DEFAULT_SECRET_KEY
    }
}

/// Split a comma-separated origin list, dropping blanks
fn parse_origin_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by `tests` and `property_tests`; both mutate process env.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "DATABASE_URL",
    "SECRET_KEY",
    "OPENAI_API_KEY",
    "AI_TUTOR_SERVER_HOST",
    "AI_TUTOR_SERVER_PORT",
    "AI_TUTOR_SERVER_CORS_ORIGINS",
    "AI_TUTOR_DATABASE_DRIVER",
    "AI_TUTOR_DATABASE_URL",
    "AI_TUTOR_AUTH_SECRET_KEY",
    "AI_TUTOR_AUTH_ACCESS_TOKEN_EXPIRE_MINUTES",
    "AI_TUTOR_AI_API_KEY",
    "AI_TUTOR_AI_MODEL",
    "AI_TUTOR_AI_BASE_URL",
    "AI_TUTOR_AI_MAX_TOKENS",
    "AI_TUTOR_AI_TEMPERATURE",
    "AI_TUTOR_AI_TIMEOUT_SECONDS",
    "AI_TUTOR_APP_NAME",
    "AI_TUTOR_APP_DEBUG",
    "AI_TUTOR_LOGGING_LEVEL",
];

#[cfg(test)]
fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}
