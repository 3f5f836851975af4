use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    audio::{ClickParameters, TempoParameters, TimeWindow, ANALYSIS_SAMPLE_RATE},
    error::{ConfigError, Result, TanalError},
};

/// Main configuration for tanal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sample rate audio is decoded to before analysis (Hz)
    pub sample_rate: u32,

    /// Tempo estimation settings
    pub analysis: TempoParameters,

    /// Time range of the file to analyze
    pub window: TimeWindow,

    /// Click-track playback settings
    pub playback: ClickParameters,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: ANALYSIS_SAMPLE_RATE,
            analysis: TempoParameters::default(),
            window: TimeWindow::default(),
            playback: ClickParameters::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sample_rate".to_string(),
                value: self.sample_rate.to_string()
            }.into());
        }

        self.analysis.validate().map_err(|e| section_error("analysis", e))?;
        self.playback.validate().map_err(|e| section_error("playback", e))?;

        if !self.window.start.is_finite() || self.window.start < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "window.start".to_string(),
                value: self.window.start.to_string()
            }.into());
        }

        if let Some(end) = self.window.end {
            if end != 0.0 && (end.is_nan() || end <= self.window.start) {
                return Err(ConfigError::InvalidValue {
                    key: "window.end".to_string(),
                    value: end.to_string()
                }.into());
            }
        }

        Ok(())
    }
}

/// Report an out-of-domain parameter under its config section
fn section_error(section: &str, error: TanalError) -> TanalError {
    match error {
        TanalError::Analysis(crate::error::AnalysisError::InvalidParameter { name, value }) => {
            ConfigError::InvalidValue {
                key: format!("{section}.{name}"),
                value,
            }
            .into()
        }
        other => other,
    }
}
