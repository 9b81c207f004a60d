//! Configuration types for Warden.
//!
//! A single `warden.yaml` file carries one section per subsystem. Every section
//! has defaults, so an empty file is a valid configuration. Durations are written
//! in humantime form (`"30s"`, `"2m"`, `"1h 30m"`).
//!
//! Policies may be given inline under `policies` or in a separate file named by
//! `policies_file`, resolved relative to the main configuration file. Policy
//! entries are kept as raw YAML here and typed by the policy crate.

pub mod duration;
pub mod keys;
pub mod rate_limit;
pub mod resilience;
pub mod store;
pub mod token;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use keys::KeyConfig;
pub use rate_limit::{RateLimitAlgorithm, RateLimitConfig};
pub use resilience::{BulkheadConfig, CircuitBreakerConfig, RetryConfig};
pub use store::{StoreBackend, StoreConfig};
pub use token::{ScopeMatch, TokenConfig};

/// Complete Warden configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WardenConfig {
    /// Token issuance and validation.
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Signing key material and rotation.
    #[serde(default)]
    pub keys: KeyConfig,

    /// Token store backend.
    #[serde(default)]
    pub store: StoreConfig,

    /// Per-caller admission control.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Backend circuit breakers.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Backend retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Backend concurrency limit.
    #[serde(default)]
    pub bulkhead: BulkheadConfig,

    /// Path to a policy file (alternative to inline).
    #[serde(default)]
    pub policies_file: Option<PathBuf>,

    /// Inline policy definitions.
    #[serde(default)]
    pub policies: Vec<serde_yaml::Value>,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Shape of a standalone policy file: either a bare list or `policies: [...]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyFile {
    List(Vec<serde_yaml::Value>),
    Document {
        #[serde(default)]
        policies: Vec<serde_yaml::Value>,
    },
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // serde_yaml rejects an empty document for a struct.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration, pull in `policies_file` and validate the result.
    ///
    /// File policies are appended after inline ones.
    pub fn load_with_context(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(policies_file) = &config.policies_file {
            let policies_path = if policies_file.is_absolute() {
                policies_file.clone()
            } else {
                base_dir.join(policies_file)
            };

            if !policies_path.exists() {
                return Err(ConfigError::Config(format!(
                    "policies file not found: {}",
                    policies_path.display()
                )));
            }

            let content = fs::read_to_string(&policies_path)?;
            let loaded = match serde_yaml::from_str::<PolicyFile>(&content)? {
                PolicyFile::List(list) => list,
                PolicyFile::Document { policies } => policies,
            };
            tracing::debug!(
                path = %policies_path.display(),
                count = loaded.len(),
                "loaded policies file"
            );
            config.policies.extend(loaded);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a subsystem unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.issuer.trim().is_empty() {
            return Err(ConfigError::Config("tokens.issuer must not be empty".into()));
        }
        if self.tokens.access_validity.is_zero() || self.tokens.refresh_validity.is_zero() {
            return Err(ConfigError::Config(
                "token validity periods must be greater than zero".into(),
            ));
        }
        for (name, value) in [
            ("tokens.access_validity", self.tokens.access_validity),
            ("tokens.refresh_validity", self.tokens.refresh_validity),
            ("tokens.clock_skew", self.tokens.clock_skew),
            ("tokens.retention", self.tokens.retention),
        ] {
            if chrono::Duration::from_std(value).is_err() {
                return Err(ConfigError::Config(format!("{name} is out of range")));
            }
        }
        if self.tokens.cleanup_interval.is_zero() {
            return Err(ConfigError::Config(
                "tokens.cleanup_interval must be greater than zero".into(),
            ));
        }
        if matches!(self.keys.rotation_interval, Some(d) if d.is_zero()) {
            return Err(ConfigError::Config(
                "keys.rotation_interval must be greater than zero".into(),
            ));
        }

        let rl = &self.rate_limit;
        if rl.requests_per_second == 0 {
            return Err(ConfigError::Config(
                "rate_limit.requests_per_second must be greater than zero".into(),
            ));
        }
        match rl.algorithm {
            RateLimitAlgorithm::SlidingWindow if rl.quota() == 0 => {
                return Err(ConfigError::Config(
                    "rate_limit.window admits no requests at the configured rate".into(),
                ));
            }
            RateLimitAlgorithm::TokenBucket if rl.burst == 0 => {
                return Err(ConfigError::Config(
                    "rate_limit.burst must be greater than zero".into(),
                ));
            }
            _ => {}
        }
        if rl.cleanup_interval.is_zero() {
            return Err(ConfigError::Config(
                "rate_limit.cleanup_interval must be greater than zero".into(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Config(
                "circuit_breaker.failure_threshold must be greater than zero".into(),
            ));
        }
        if self.circuit_breaker.half_open_limit == 0 {
            return Err(ConfigError::Config(
                "circuit_breaker.half_open_limit must be greater than zero".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Config(
                "retry.multiplier must be a finite value >= 1.0".into(),
            ));
        }

        if self.bulkhead.max_concurrent == 0 {
            return Err(ConfigError::Config(
                "bulkhead.max_concurrent must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = WardenConfig::from_yaml("").unwrap();
        assert_eq!(config.tokens.clock_skew, Duration::from_secs(120));
        assert_eq!(config.tokens.access_validity, Duration::from_secs(3600));
        assert_eq!(config.rate_limit.requests_per_second, 10);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.half_open_limit, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.bulkhead.max_concurrent, 10);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_humantime_durations() {
        let yaml = r#"
tokens:
  issuer: auth.example.com
  access_validity: 15m
  clock_skew: 30s
  allowed_audiences: [api]
rate_limit:
  algorithm: token_bucket
  requests_per_second: 50
  burst: 100
circuit_breaker:
  reset_timeout: 1m 30s
bulkhead:
  max_concurrent: 4
  max_wait: 250ms
keys:
  rotation_interval: 24h
"#;
        let config = WardenConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.tokens.issuer, "auth.example.com");
        assert_eq!(config.tokens.access_validity, Duration::from_secs(15 * 60));
        assert_eq!(config.tokens.clock_skew, Duration::from_secs(30));
        assert_eq!(config.tokens.allowed_audiences, vec!["api".to_string()]);
        assert_eq!(config.rate_limit.algorithm, RateLimitAlgorithm::TokenBucket);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(90));
        assert_eq!(config.bulkhead.max_wait, Some(Duration::from_millis(250)));
        assert_eq!(
            config.keys.rotation_interval,
            Some(Duration::from_secs(24 * 3600))
        );
        // untouched fields keep their defaults
        assert_eq!(config.retry.initial_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = WardenConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Config(_))));

        let mut config = WardenConfig::default();
        config.bulkhead.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.rate_limit.window = Duration::from_millis(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_token_durations() {
        let mut config = WardenConfig::default();
        config.tokens.clock_skew = Duration::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tokens.clock_skew"));

        let mut config = WardenConfig::default();
        config.tokens.retention = Duration::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Config(_))));

        // Large but representable is fine.
        let mut config = WardenConfig::default();
        config.tokens.retention = Duration::from_secs(10 * 365 * 24 * 3600);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_with_context_resolves_policies_file() {
        let dir = tempfile::tempdir().unwrap();

        let mut policies = fs::File::create(dir.path().join("policies.yaml")).unwrap();
        writeln!(
            policies,
            "policies:\n  - id: from-file\n    effect: allow\n"
        )
        .unwrap();

        let main_path = dir.path().join("warden.yaml");
        let mut main = fs::File::create(&main_path).unwrap();
        writeln!(
            main,
            "policies_file: policies.yaml\npolicies:\n  - id: inline\n    effect: deny\n"
        )
        .unwrap();

        let config = WardenConfig::load_with_context(&main_path).unwrap();
        assert_eq!(config.policies.len(), 2);
        assert_eq!(config.policies[0]["id"].as_str(), Some("inline"));
        assert_eq!(config.policies[1]["id"].as_str(), Some("from-file"));
    }

    #[test]
    fn test_load_with_context_missing_policies_file() {
        let dir = tempfile::tempdir().unwrap();
        let main_path = dir.path().join("warden.yaml");
        fs::write(&main_path, "policies_file: nowhere.yaml\n").unwrap();

        let err = WardenConfig::load_with_context(&main_path).unwrap_err();
        assert!(matches!(err, ConfigError::Config(msg) if msg.contains("nowhere.yaml")));
    }
}
