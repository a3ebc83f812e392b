//! Configuration for model loading, preprocessing and ranking

use crate::codec::PreprocessConfig;
use crate::fetch::ModelLocation;
use crate::layers::DeviceType;
use crate::loader::RetryPolicy;
use serde::{Deserialize, Serialize};
use snapclass_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Model artifact and loading behaviour
    #[serde(default)]
    pub model: ModelSettings,

    /// Image preprocessing
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    /// Label file (JSON or one label per line)
    #[serde(default)]
    pub labels: Option<PathBuf>,

    /// Number of predictions returned per image
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Model location and loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Path, URL or `hf://owner/repo[@rev][/file]` of `model.json`
    #[serde(default = "default_location")]
    pub location: String,

    /// Device to run inference on
    #[serde(default)]
    pub device: DeviceType,

    /// Run a throwaway inference right after loading
    #[serde(default = "default_true")]
    pub warm_up: bool,

    /// Retry settings
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry settings as written in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_location() -> String {
    "./model/model.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    2000
}

fn default_top_k() -> usize {
    6
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            location: default_location(),
            device: DeviceType::default(),
            warm_up: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        RetryPolicy::new(config.max_attempts, Duration::from_millis(config.delay_ms))
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            preprocess: PreprocessConfig::default(),
            labels: None,
            top_k: default_top_k(),
        }
    }
}

impl ClassifierConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            Error::config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed model location
    pub fn location(&self) -> Result<ModelLocation> {
        self.model.location.parse()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.model.retry.into()
    }

    /// Check values serde cannot check
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::config("top_k must be at least 1"));
        }
        self.retry_policy().validate()?;
        self.preprocess.validate()?;
        self.location()?;
        Ok(())
    }
}
