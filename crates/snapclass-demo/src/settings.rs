//! Layered settings
//!
//! Sources, lowest to highest precedence: the YAML config file (optional),
//! `SNAPCLASS__*` environment variables (`SNAPCLASS__MODEL__LOCATION`,
//! `SNAPCLASS__TOP_K`, ...), then command-line flags.

use crate::cli::ModelArgs;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use snapclass_classifiers::{ClassifierConfig, ModelSettings, PreprocessConfig};
use std::path::{Path, PathBuf};

/// Everything the binary can be configured with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapclassSettings {
    #[serde(default)]
    pub model: ModelSettings,

    #[serde(default)]
    pub preprocess: PreprocessConfig,

    #[serde(default)]
    pub labels: Option<PathBuf>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_top_k() -> usize {
    6
}

impl Default for SnapclassSettings {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            preprocess: PreprocessConfig::default(),
            labels: None,
            top_k: default_top_k(),
            log: LogSettings::default(),
        }
    }
}

impl SnapclassSettings {
    /// Read the config file (if it exists) and environment overrides
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SNAPCLASS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read settings from {}", path.display()))?
            .try_deserialize()
            .context("Invalid settings")
    }

    /// Apply the model flags given on the command line
    pub fn apply_model_args(&mut self, args: &ModelArgs) {
        if let Some(location) = &args.model {
            self.model.location = location.clone();
        }
        if let Some(device) = args.device {
            self.model.device = device;
        }
        if args.no_warm_up {
            self.model.warm_up = false;
        }
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            model: self.model.clone(),
            preprocess: self.preprocess.clone(),
            labels: self.labels.clone(),
            top_k: self.top_k,
        }
    }
}
