//! Configuration module for the price tracker backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Error raised when an environment variable holds an unusable value.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

/// Allowed CORS origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

impl CorsOrigins {
    fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if origins.iter().any(|o| o == "*") {
            CorsOrigins::Any
        } else {
            CorsOrigins::List(origins)
        }
    }
}

/// Settings for the optional AI categorization call.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (disabled when unset)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub cors_origins: CorsOrigins,
    /// Timeout for the single outbound page fetch
    pub fetch_timeout: Duration,
    pub user_agent: String,
    /// AI categorization, enabled only when an API key is present
    pub ai: Option<AiConfig>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("TRACKER_API_PSK").ok().filter(|s| !s.is_empty());

        let db_path = env::var("TRACKER_DB_PATH")
            .unwrap_or_else(|_| "./data/tracker.sqlite".to_string())
            .into();

        let index_path = env::var("TRACKER_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = env::var("TRACKER_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError {
                var: "TRACKER_BIND_ADDR",
                reason: e.to_string(),
            })?;

        let log_level = env::var("TRACKER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let cors_origins = CorsOrigins::parse(
            &env::var("TRACKER_CORS_ORIGINS").unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.to_string()),
        );

        let fetch_timeout_secs: u64 = match env::var("TRACKER_FETCH_TIMEOUT_SECS") {
            Ok(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError {
                var: "TRACKER_FETCH_TIMEOUT_SECS",
                reason: e.to_string(),
            })?,
            Err(_) => 10,
        };
        if fetch_timeout_secs == 0 {
            return Err(ConfigError {
                var: "TRACKER_FETCH_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let user_agent =
            env::var("TRACKER_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());

        let ai = env::var("TRACKER_AI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|api_key| AiConfig {
                api_key,
                base_url: env::var("TRACKER_AI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                model: env::var("TRACKER_AI_MODEL")
                    .unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),
            });

        Ok(Self {
            api_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
            cors_origins,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            user_agent,
            ai,
        })
    }
}
