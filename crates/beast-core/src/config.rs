//! # Environment-Based Configuration
//!
//! All settings come from environment variables so the same binary can be
//! deployed to every platform without rebuilds.
//!
//! ## Environment Variables
//!
//! ### Listener and platform
//! - `PORT` - HTTP listener port, HTTP adapters only (default: 8080)
//! - `PLATFORM` - `cloud_run`, `gke` or `cloud_functions` (default: auto-detected)
//!
//! ### Request handling
//! - `BEAST_ACCEPT_CUSTOM` - Accept custom capabilities (default: false)
//! - `BEAST_MAX_PAYLOAD_BYTES` - Maximum payload size in bytes (default: 1048576)
//! - `BEAST_MAX_PAYLOAD_DEPTH` - Maximum payload nesting depth (default: 32)
//! - `BEAST_REQUEST_TIMEOUT_SECS` - Request timeout in seconds (default: 30)
//!
//! ### Beast Mode (coordination)
//! - `BEAST_MODE_ENABLED` - Activate the coordination layer (default: false)
//! - `REDIS_HOST` - Bus host, required when Beast Mode is enabled
//! - `REDIS_PORT` - Bus port (default: 6379)
//! - `BEAST_MODE_REQUIRED` - Treat the bus as a mandatory dependency (default: false)
//! - `BEAST_MODE_TOPIC` - Pub/sub topic shared by one deployment (default: "beast-mode")
//! - `BEAST_HEARTBEAT_SECS` - Presence heartbeat interval (default: 5)
//! - `BEAST_STALENESS_SECS` - Peer staleness threshold (default: 15)
//! - `BEAST_DISCOVERY_TIMEOUT_MS` - Bounded discovery wait (default: 2000)
//! - `BEAST_QUIESCENCE_MS` - Claim quiescence window (default: 250)
//! - `BEAST_CLAIM_TTL_SECS` - Claim expiry horizon (default: 300)

use std::{env, time::Duration};

use crate::identity::Platform;
use crate::model::PayloadLimits;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Coordination layer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeastModeConfig {
    pub enabled: bool,
    pub redis_host: Option<String>,
    pub redis_port: u16,
    pub required: bool,
    pub topic: String,
    pub heartbeat_interval: Duration,
    pub staleness_threshold: Duration,
    pub discovery_timeout: Duration,
    pub quiescence_window: Duration,
    pub claim_ttl: Duration,
}

impl Default for BeastModeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_host: None,
            redis_port: 6379,
            required: false,
            topic: "beast-mode".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            staleness_threshold: Duration::from_secs(15),
            discovery_timeout: Duration::from_millis(2000),
            quiescence_window: Duration::from_millis(250),
            claim_ttl: Duration::from_secs(300),
        }
    }
}

impl BeastModeConfig {
    /// Bus URL, if a host is configured
    pub fn redis_url(&self) -> Option<String> {
        self.redis_host
            .as_ref()
            .map(|host| format!("redis://{}:{}", host, self.redis_port))
    }
}

/// Complete agent configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub port: u16,
    /// Explicit platform; `None` means detect at startup
    pub platform: Option<Platform>,
    pub accept_custom: bool,
    pub limits: PayloadLimits,
    pub request_timeout: Duration,
    pub beast_mode: BeastModeConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            platform: None,
            accept_custom: false,
            limits: PayloadLimits::default(),
            request_timeout: Duration::from_secs(30),
            beast_mode: BeastModeConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load and validate configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable has an invalid value or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        AgentConfigBuilder::from_env()?.build()
    }

    /// Platform to run as: explicit setting, else detection, else `fallback`
    pub fn resolve_platform(&self, fallback: Platform) -> Platform {
        self.platform
            .or_else(Platform::detect)
            .unwrap_or(fallback)
    }
}

/// Builder for [`AgentConfig`] with environment variable support
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every recognised variable on top of the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::default();

        if let Some(port) = get_env_u16("PORT")? {
            builder = builder.port(port);
        }
        if let Some(platform) = get_env_string("PLATFORM").filter(|p| !p.trim().is_empty()) {
            let platform = platform
                .parse::<Platform>()
                .map_err(|e| ConfigError::InvalidEnvVar {
                    key: "PLATFORM".to_string(),
                    message: e.to_string(),
                })?;
            builder = builder.platform(platform);
        }
        if let Some(accept) = get_env_bool("BEAST_ACCEPT_CUSTOM")? {
            builder = builder.accept_custom(accept);
        }

        let mut limits = PayloadLimits::default();
        if let Some(bytes) = get_env_usize("BEAST_MAX_PAYLOAD_BYTES")? {
            limits.max_bytes = bytes;
        }
        if let Some(depth) = get_env_usize("BEAST_MAX_PAYLOAD_DEPTH")? {
            limits.max_depth = depth;
        }
        builder = builder.limits(limits);

        if let Some(secs) = get_env_u64("BEAST_REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        // Beast Mode
        let mut beast = BeastModeConfig::default();
        if let Some(enabled) = get_env_bool("BEAST_MODE_ENABLED")? {
            beast.enabled = enabled;
        }
        beast.redis_host = get_env_string("REDIS_HOST").filter(|h| !h.trim().is_empty());
        if let Some(port) = get_env_u16("REDIS_PORT")? {
            beast.redis_port = port;
        }
        if let Some(required) = get_env_bool("BEAST_MODE_REQUIRED")? {
            beast.required = required;
        }
        if let Some(topic) = get_env_string("BEAST_MODE_TOPIC") {
            beast.topic = topic;
        }
        if let Some(secs) = get_env_u64("BEAST_HEARTBEAT_SECS")? {
            beast.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64("BEAST_STALENESS_SECS")? {
            beast.staleness_threshold = Duration::from_secs(secs);
        }
        if let Some(ms) = get_env_u64("BEAST_DISCOVERY_TIMEOUT_MS")? {
            beast.discovery_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = get_env_u64("BEAST_QUIESCENCE_MS")? {
            beast.quiescence_window = Duration::from_millis(ms);
        }
        if let Some(secs) = get_env_u64("BEAST_CLAIM_TTL_SECS")? {
            beast.claim_ttl = Duration::from_secs(secs);
        }
        builder = builder.beast_mode(beast);

        Ok(builder)
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.config.platform = Some(platform);
        self
    }

    #[must_use]
    pub fn accept_custom(mut self, accept: bool) -> Self {
        self.config.accept_custom = accept;
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: PayloadLimits) -> Self {
        self.config.limits = limits;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn beast_mode(mut self, beast_mode: BeastModeConfig) -> Self {
        self.config.beast_mode = beast_mode;
        self
    }

    /// Validate and build the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<AgentConfig, ConfigError> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let config = &self.config;

        if config.limits.max_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max payload bytes must be greater than 0".to_string(),
            ));
        }
        if config.limits.max_depth == 0 {
            return Err(ConfigError::ValidationError(
                "max payload depth must be greater than 0".to_string(),
            ));
        }
        if config.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request timeout must be greater than 0".to_string(),
            ));
        }

        let beast = &config.beast_mode;
        if !beast.enabled {
            return Ok(());
        }
        if beast.redis_host.is_none() {
            return Err(ConfigError::ValidationError(
                "REDIS_HOST is required when BEAST_MODE_ENABLED is true".to_string(),
            ));
        }
        if beast.topic.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Beast Mode topic cannot be empty".to_string(),
            ));
        }
        if beast.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "heartbeat interval must be greater than 0".to_string(),
            ));
        }
        if beast.staleness_threshold <= beast.heartbeat_interval {
            return Err(ConfigError::ValidationError(
                "staleness threshold must exceed the heartbeat interval".to_string(),
            ));
        }
        if beast.quiescence_window.is_zero() {
            return Err(ConfigError::ValidationError(
                "quiescence window must be greater than 0".to_string(),
            ));
        }
        if beast.claim_ttl <= beast.quiescence_window {
            return Err(ConfigError::ValidationError(
                "claim TTL must exceed the quiescence window".to_string(),
            ));
        }

        Ok(())
    }
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn get_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!(
                    "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                ),
            }),
        },
        Err(_) => Ok(None),
    }
}

fn get_env_parsed<T>(key: &str, kind: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid {kind} '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_u16(key: &str) -> Result<Option<u16>, ConfigError> {
    get_env_parsed(key, "port number")
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    get_env_parsed(key, "integer")
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    get_env_parsed(key, "size")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfigBuilder::new().build().unwrap();
        assert_eq!(config.port, 8080);
        assert!(!config.beast_mode.enabled);
        assert_eq!(config.beast_mode.redis_url(), None);
    }

    #[test]
    fn test_beast_mode_requires_host() {
        let beast = BeastModeConfig {
            enabled: true,
            ..Default::default()
        };
        let err = AgentConfigBuilder::new().beast_mode(beast).build().unwrap_err();
        assert!(err.to_string().contains("REDIS_HOST"));
    }

    #[test]
    fn test_staleness_must_exceed_heartbeat() {
        let beast = BeastModeConfig {
            enabled: true,
            redis_host: Some("localhost".into()),
            heartbeat_interval: Duration::from_secs(10),
            staleness_threshold: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(AgentConfigBuilder::new().beast_mode(beast).build().is_err());
    }

    #[test]
    fn test_redis_url() {
        let beast = BeastModeConfig {
            redis_host: Some("10.0.0.5".into()),
            redis_port: 6380,
            ..Default::default()
        };
        assert_eq!(beast.redis_url().as_deref(), Some("redis://10.0.0.5:6380"));
    }

    #[test]
    fn test_explicit_platform_wins() {
        let config = AgentConfigBuilder::new()
            .platform(Platform::Gke)
            .build()
            .unwrap();
        assert_eq!(config.resolve_platform(Platform::CloudRun), Platform::Gke);
    }
}
