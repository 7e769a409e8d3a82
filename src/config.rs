//! Configuration management for Swirl.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SwirlError};
use crate::ratelimit::LimiterConfig;

/// Main configuration for Swirl.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwirlConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Store configuration
    #[serde(default)]
    pub store: StoreSettings,
}

/// Limiter settings as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Maximum increments per period
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Rolling period in seconds
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Bucket width in seconds
    #[serde(default = "default_bucket_width_secs")]
    pub bucket_width_secs: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            period_secs: default_period_secs(),
            bucket_width_secs: default_bucket_width_secs(),
        }
    }
}

fn default_limit() -> u64 {
    1000
}

fn default_period_secs() -> u64 {
    3600
}

fn default_bucket_width_secs() -> u64 {
    60
}

impl LimiterSettings {
    /// Convert to a [`LimiterConfig`].
    pub fn to_limiter_config(&self) -> LimiterConfig {
        LimiterConfig::new(
            self.limit,
            Duration::from_secs(self.period_secs),
            Duration::from_secs(self.bucket_width_secs),
        )
    }
}

/// Which store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, state is lost on exit
    #[default]
    Memory,
    /// Redis hashes
    Redis,
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Backend to use
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Optional prefix for every store key
    #[serde(default)]
    pub key_prefix: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: None,
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl SwirlConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SwirlConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SwirlError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| SwirlError::Config(e.to_string()))
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.limiter.to_limiter_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SwirlConfig::default();
        assert_eq!(config.limiter.limit, 1000);
        assert_eq!(config.limiter.period_secs, 3600);
        assert_eq!(config.limiter.bucket_width_secs, 60);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
limiter:
  limit: 10
  period_secs: 3
  bucket_width_secs: 1
store:
  backend: redis
  redis_url: redis://cache:6379/2
  key_prefix: api
"#;
        let config = SwirlConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.limiter.to_limiter_config(),
            LimiterConfig::new(10, Duration::from_secs(3), Duration::from_secs(1))
        );
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, "redis://cache:6379/2");
        assert_eq!(config.store.key_prefix.as_deref(), Some("api"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = SwirlConfig::from_yaml("limiter:\n  limit: 5\n").unwrap();
        assert_eq!(config.limiter.limit, 5);
        assert_eq!(config.limiter.period_secs, 3600);
        assert_eq!(config.store, StoreSettings::default());
    }

    #[test]
    fn test_invalid_limiter_rejected() {
        let result = SwirlConfig::from_yaml("limiter:\n  limit: 0\n");
        assert!(matches!(result, Err(SwirlError::Config(_))));

        let result = SwirlConfig::from_yaml("limiter:\n  period_secs: 10\n  bucket_width_secs: 60\n");
        assert!(matches!(result, Err(SwirlError::Config(_))));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = SwirlConfig::from_yaml("store:\n  backend: etcd\n");
        assert!(matches!(result, Err(SwirlError::Config(_))));
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = SwirlConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(SwirlConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let result = SwirlConfig::from_file("/nonexistent/swirl.yaml");
        assert!(matches!(result, Err(SwirlError::Io(_))));
    }
}
