use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// JWT secret used to validate session tokens
    pub auth_jwt_secret: Option<String>,

    /// Cookie carrying the session token when no Authorization header is sent
    #[serde(default = "default_auth_cookie_name")]
    pub auth_cookie_name: String,

    /// Database URL
    pub db_url: Option<String>,

    /// Path segment of the shared features note
    #[serde(default = "default_features_note_name")]
    pub features_note_name: String,

    /// Period of the dirty document sweep
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Codec applied to payloads on the socket (plain, base64)
    #[serde(default = "default_wire_codec")]
    pub wire_codec: String,

    /// Codec applied to note bodies and titles in the store (plain, base64)
    #[serde(default = "default_store_codec")]
    pub store_codec: String,

    /// Version string answered to `version` queries
    #[serde(default = "default_app_version")]
    pub app_version: String,

    /// Attempts at picking a color not used by the note's other sessions
    #[serde(default = "default_max_color_retries")]
    pub max_color_retries: u32,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            cors_origins: None,
            log_level: default_log_level(),
            service_name: default_service_name(),
            auth_jwt_secret: None,
            auth_cookie_name: default_auth_cookie_name(),
            db_url: None,
            features_note_name: default_features_note_name(),
            flush_interval_ms: default_flush_interval_ms(),
            wire_codec: default_wire_codec(),
            store_codec: default_store_codec(),
            app_version: default_app_version(),
            max_color_retries: default_max_color_retries(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "colabri-realtime".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_auth_cookie_name() -> String {
    "auth_token".to_string()
}

fn default_features_note_name() -> String {
    "features".to_string()
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_wire_codec() -> String {
    "plain".to_string()
}

fn default_store_codec() -> String {
    "base64".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_max_color_retries() -> u32 {
    5
}
