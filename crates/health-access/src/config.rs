//! Registry configuration

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default validity of a scannable access code (30 minutes)
pub const DEFAULT_VALIDITY_MINUTES: i64 = 30;

/// Denied redemption attempts kept before the oldest are dropped
pub const DEFAULT_DENIED_LOG_CAPACITY: usize = 1000;

/// Tunables for token issuance and redemption
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Validity used when the caller does not give one
    pub default_validity_minutes: i64,
    /// Optional upper bound on any requested validity; unbounded when unset
    pub max_validity_minutes: Option<i64>,
    /// Prefix of sequential token ids (`QR1`, `QR2`, ...)
    pub token_prefix: String,
    /// Reject redemptions by parties missing from the clinician directory
    pub require_registered_clinician: bool,
    /// Most recent denied attempts retained by the registry
    pub denied_log_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_validity_minutes: DEFAULT_VALIDITY_MINUTES,
            max_validity_minutes: None,
            token_prefix: "QR".to_string(),
            require_registered_clinician: false,
            denied_log_capacity: DEFAULT_DENIED_LOG_CAPACITY,
        }
    }
}

impl RegistryConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: RegistryConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Duration::try_minutes(self.default_validity_minutes).is_none()
            || self.default_validity_minutes <= 0
        {
            return Err(ConfigError::Invalid(
                "default_validity_minutes must be positive and in range".to_string(),
            ));
        }
        if let Some(max) = self.max_validity_minutes {
            if max <= 0 || Duration::try_minutes(max).is_none() {
                return Err(ConfigError::Invalid(
                    "max_validity_minutes must be positive and in range".to_string(),
                ));
            }
            if self.default_validity_minutes > max {
                return Err(ConfigError::Invalid(format!(
                    "default_validity_minutes must be in 1..={}",
                    max
                )));
            }
        }
        if self.token_prefix.is_empty() {
            return Err(ConfigError::Invalid("token_prefix must not be empty".to_string()));
        }
        if self.denied_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "denied_log_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Zero when the configured value is out of range, which issuance rejects
    pub fn default_validity(&self) -> Duration {
        Duration::try_minutes(self.default_validity_minutes).unwrap_or_else(Duration::zero)
    }

    /// Configured cap, if any. Unrepresentable values count as no cap;
    /// `validate` rejects them for loaded configs.
    pub fn max_validity(&self) -> Option<Duration> {
        self.max_validity_minutes.and_then(Duration::try_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = RegistryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_validity(), Duration::minutes(30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"default_validity_minutes": 15}}"#).unwrap();

        let config = RegistryConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.default_validity_minutes, 15);
        assert_eq!(config.max_validity_minutes, None);
        assert_eq!(config.max_validity(), None);
        assert_eq!(config.token_prefix, "QR");
    }

    #[test]
    fn test_rejects_default_above_max() {
        let config = RegistryConfig {
            default_validity_minutes: 120,
            max_validity_minutes: Some(60),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_cap_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_validity_minutes": 1440}}"#).unwrap();

        let config = RegistryConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_validity(), Some(Duration::hours(24)));
    }

    #[test]
    fn test_rejects_zero_denied_capacity() {
        let config = RegistryConfig {
            denied_log_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_prefix() {
        let config = RegistryConfig {
            token_prefix: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
