use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::smooth::{SmootherConfig, SmoothingParams};

const APP_NAME: &str = "threat-surface";
const CONFIG_FILE: &str = "dcm.json";

/// Training and smoothing parameters for a kernel density discrete choice model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DcmConfig {
    pub name: String,
    /// Spacing of the smoothed output grid, in map units.
    pub point_spacing: f64,
    /// Upper bound on kernel source points per smoothing call. 0 disables sampling.
    pub training_sample_size: usize,
    /// Upper bound on points used for bandwidth selection. 0 disables sampling.
    pub prediction_sample_size: usize,
    pub normalize: bool,
    /// Applied in order to raw predictions.
    #[serde(default)]
    pub smoothers: Vec<SmootherConfig>,
}

impl Default for DcmConfig {
    fn default() -> Self {
        Self {
            name: "KDE DCM".to_string(),
            point_spacing: 200.0,
            training_sample_size: 500,
            prediction_sample_size: 2000,
            normalize: true,
            smoothers: vec![SmootherConfig::default()],
        }
    }
}

impl DcmConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid("name", "model name must not be empty"));
        }
        self.smoothing_params().validate()?;
        for smoother in &self.smoothers {
            smoother.validate()?;
        }
        Ok(())
    }

    pub fn smoothing_params(&self) -> SmoothingParams {
        SmoothingParams {
            point_spacing: self.point_spacing,
            training_sample_size: self.training_sample_size,
            prediction_sample_size: self.prediction_sample_size,
            normalize: self.normalize,
        }
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("Invalid model configuration")?;
        Ok(config)
    }

    /// Load configuration from the user's config directory.
    /// Returns defaults if the file doesn't exist or fails to load.
    pub fn load_or_default() -> Self {
        let path = match default_config_path() {
            Ok(path) if path.exists() => path,
            Ok(_) => return Self::default(),
            Err(e) => {
                tracing::warn!("Failed to locate config directory, using defaults: {:#}", e);
                return Self::default();
            }
        };

        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
