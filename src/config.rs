//! Orchestrator Configuration
//!
//! Handles loading and saving configuration from TOML files: the auto-refresh
//! debounce, the remote-call timeout, and the deployment table.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deployment::{Deployment, DeploymentMap};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Survey orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// Delay before the one-shot automatic refresh, to avoid racing a
    /// wallet's settling event stream
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Timeout applied to each remote call (confirmation wait, authorization
    /// resolution, decryption batch). `None` disables the timeout.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: Option<u64>,

    /// Deployments overriding or extending the built-in table
    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_call_timeout_secs() -> Option<u64> {
    Some(120)
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            deployments: Vec::new(),
        }
    }
}

impl SurveyConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms > 10_000 {
            return Err(ConfigError::Invalid(
                "debounce_ms must be at most 10000".to_string(),
            ));
        }
        if self.call_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "call_timeout_secs must be positive or absent".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    /// Built-in deployment table with configured entries applied on top
    pub fn deployment_map(&self) -> DeploymentMap {
        let mut map = DeploymentMap::default();
        for deployment in &self.deployments {
            map.insert(deployment.clone());
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{Address, LOCAL_CHAIN_ID, TESTNET_CHAIN_ID};

    #[test]
    fn test_default_is_valid() {
        let config = SurveyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.debounce(), Duration::from_millis(200));
        assert_eq!(config.call_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = SurveyConfig {
            call_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_configured_deployments_override_builtins() {
        let config = SurveyConfig {
            deployments: vec![Deployment {
                address: Address::from_bytes([0x11; 20]),
                chain_id: LOCAL_CHAIN_ID,
                name: "Local override".to_string(),
            }],
            ..Default::default()
        };
        let map = config.deployment_map();
        assert_eq!(
            map.get(LOCAL_CHAIN_ID).unwrap().address,
            Address::from_bytes([0x11; 20])
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.toml");

        let config = SurveyConfig {
            debounce_ms: 50,
            call_timeout_secs: Some(30),
            deployments: vec![Deployment {
                address: Address::from_bytes([0x22; 20]),
                chain_id: TESTNET_CHAIN_ID,
                name: "Sepolia".to_string(),
            }],
        };
        config.save(&path).unwrap();

        let loaded = SurveyConfig::load(&path).unwrap();
        assert_eq!(loaded.debounce_ms, 50);
        assert_eq!(loaded.call_timeout_secs, Some(30));
        assert_eq!(loaded.deployments.len(), 1);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = SurveyConfig::load(Path::new("/nonexistent/survey.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
