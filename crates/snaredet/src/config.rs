//! Application configuration
//!
//! Defaults, then an optional TOML file, then command-line flags. Everything
//! is validated before any device is opened or socket bound.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use snaredet_control::WebServerConfig;
use snaredet_core::{AudioConfig, DetectorConfig, LogConfig, PreprocessConfig};
use std::fs;
use std::path::Path;

use crate::cli::Cli;

/// Complete detector settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub detector: DetectorConfig,
    pub preprocess: PreprocessConfig,
    pub server: WebServerConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Load from a TOML file; missing sections and keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Defaults or the `--config` file, with flags applied on top
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        cli.apply(&mut config);
        Ok(config)
    }

    /// Reject anything that would fail later or detect nonsense
    pub fn validate(&self) -> Result<()> {
        self.detector
            .validate()
            .context("Invalid detector settings")?;
        self.audio.validate().context("Invalid audio settings")?;
        if self.preprocess.enabled {
            self.preprocess
                .validate(Some(self.audio.sample_rate))
                .context("Invalid pre-processing settings")?;
        }
        self.server.validate().context("Invalid server settings")?;
        Ok(())
    }
}
