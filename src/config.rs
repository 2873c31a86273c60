//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub subscription: SubscriptionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub live: LiveDataConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Live-data socket configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_ws_url")]
    pub url: String,

    /// Base interval for reconnect backoff
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
}

fn default_ws_url() -> String {
    "ws://localhost:8080/ws/monitoring".to_string()
}

fn default_reconnect_interval() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_client_id() -> String {
    format!("enginewatch-{}", uuid::Uuid::new_v4())
}

fn default_protocol_version() -> String {
    "1.0".to_string()
}

fn default_capabilities() -> Vec<String> {
    ["data_update", "alert", "device_status", "heartbeat"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl ConnectionConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_ws_url(),
            reconnect_interval_ms: default_reconnect_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            client_id: default_client_id(),
            protocol_version: default_protocol_version(),
            capabilities: default_capabilities(),
        }
    }
}

/// Subscription behavior
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// How long to wait for a SUBSCRIPTION_ACK
    #[serde(default = "default_subscription_timeout")]
    pub subscription_timeout_ms: u64,

    #[serde(default = "default_frequency")]
    pub default_frequency_ms: u64,
}

fn default_subscription_timeout() -> u64 {
    10_000
}

fn default_frequency() -> u64 {
    1000
}

impl SubscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_timeout_ms)
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            subscription_timeout_ms: default_subscription_timeout(),
            default_frequency_ms: default_frequency(),
        }
    }
}

/// Historical query cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    /// Lifetime of a cached result
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Period of the background expiry sweep
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_max_cache_size() -> usize {
    100
}

fn default_ttl() -> u64 {
    30 * 60
}

fn default_cleanup_interval() -> u64 {
    5 * 60
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: default_max_cache_size(),
            ttl_secs: default_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// Per-device live buffers
#[derive(Debug, Clone, Deserialize)]
pub struct LiveDataConfig {
    /// Readings kept for live display
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,

    /// Readings kept for trend queries
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_listener_capacity")]
    pub listener_capacity: usize,
}

fn default_recent_capacity() -> usize {
    1000
}

fn default_history_capacity() -> usize {
    5000
}

fn default_listener_capacity() -> usize {
    1024
}

impl Default for LiveDataConfig {
    fn default() -> Self {
        Self {
            recent_capacity: default_recent_capacity(),
            history_capacity: default_history_capacity(),
            listener_capacity: default_listener_capacity(),
        }
    }
}

/// REST collaborator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Retries after the first failed fetch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff step between retries
    #[serde(default = "default_retry_delay")]
    pub retry_base_delay_ms: u64,
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    1000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    1000
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            request_timeout_ms: default_request_timeout(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_delay(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("enginewatch").join("config.toml")),
            Some(PathBuf::from("/etc/enginewatch/config.toml")),
            Some(PathBuf::from("./enginewatch.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ENGINEWATCH_WS_URL") {
            self.connection.url = url;
        }
        if let Some(n) = env_parse("ENGINEWATCH_MAX_RECONNECT_ATTEMPTS") {
            self.connection.max_reconnect_attempts = n;
        }
        if let Some(ms) = env_parse("ENGINEWATCH_HEARTBEAT_INTERVAL_MS") {
            self.connection.heartbeat_interval_ms = ms;
        }
        if let Ok(client_id) = std::env::var("ENGINEWATCH_CLIENT_ID") {
            self.connection.client_id = client_id;
        }

        if let Some(ms) = env_parse("ENGINEWATCH_SUBSCRIPTION_TIMEOUT_MS") {
            self.subscription.subscription_timeout_ms = ms;
        }

        if let Some(size) = env_parse("ENGINEWATCH_MAX_CACHE_SIZE") {
            self.cache.max_cache_size = size;
        }

        if let Ok(url) = std::env::var("ENGINEWATCH_API_URL") {
            self.api.base_url = url;
        }

        if let Ok(level) = std::env::var("ENGINEWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("ENGINEWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Enginewatch Configuration
#
# Environment variables override these settings:
# - ENGINEWATCH_WS_URL
# - ENGINEWATCH_MAX_RECONNECT_ATTEMPTS
# - ENGINEWATCH_HEARTBEAT_INTERVAL_MS
# - ENGINEWATCH_CLIENT_ID
# - ENGINEWATCH_SUBSCRIPTION_TIMEOUT_MS
# - ENGINEWATCH_MAX_CACHE_SIZE
# - ENGINEWATCH_API_URL
# - ENGINEWATCH_LOG_LEVEL
# - ENGINEWATCH_LOG_FORMAT

[connection]
# Live-data WebSocket endpoint
url = "ws://localhost:8080/ws/monitoring"

# Base reconnect delay (ms); doubles per attempt up to max_reconnect_delay_ms
reconnect_interval_ms = 1000
max_reconnect_attempts = 5
max_reconnect_delay_ms = 30000

# Heartbeat period while connected (ms)
heartbeat_interval_ms = 30000

protocol_version = "1.0"
capabilities = ["data_update", "alert", "device_status", "heartbeat"]

[subscription]
# How long to wait for a subscription acknowledgement (ms)
subscription_timeout_ms = 10000
default_frequency_ms = 1000

[cache]
# Maximum cached historical query results
max_cache_size = 100

# Result lifetime (seconds)
ttl_secs = 1800

# Expiry sweep period (seconds)
cleanup_interval_secs = 300

[live]
# Readings kept per device for live display
recent_capacity = 1000

# Readings kept per device for trend queries
history_capacity = 5000

[api]
# REST endpoint for historical data
base_url = "http://localhost:8080"
request_timeout_ms = 30000
page_size = 1000

# Retries after a failed fetch, with linear backoff
max_retries = 2
retry_base_delay_ms = 1000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.max_reconnect_attempts, 5);
        assert_eq!(config.connection.max_reconnect_delay(), Duration::from_secs(30));
        assert_eq!(config.cache.ttl(), Duration::from_secs(1800));
        assert_eq!(config.cache.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(config.live.recent_capacity, 1000);
        assert_eq!(config.live.history_capacity, 5000);
        assert_eq!(config.api.max_retries, 2);
        assert!(config.connection.client_id.starts_with("enginewatch-"));
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.connection.url, "ws://localhost:8080/ws/monitoring");
        assert_eq!(config.cache.max_cache_size, 100);
        assert_eq!(config.subscription.timeout(), Duration::from_secs(10));
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[cache]\nmax_cache_size = 7\n\n[connection]\nurl = \"ws://ship:9000/ws\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.cache.max_cache_size, 7);
        assert_eq!(config.cache.ttl_secs, 1800);
        assert_eq!(config.connection.url, "ws://ship:9000/ws");
        assert_eq!(config.connection.heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/nonexistent/enginewatch.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache\nbroken").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
