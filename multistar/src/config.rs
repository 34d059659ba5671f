//! Guiding configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which guiding algorithm a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Weighted pool of stars with reacquisition and mass filtering
    #[default]
    MultiStar,
    /// Primary star only
    SingleStar,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mass_change_threshold must be in (0, 1], got {0}")]
    MassThreshold(f64),

    #[error("tolerate_jumps_threshold must be positive, got {0}")]
    JumpThreshold(f64),

    #[error("search_region must be at least 1 pixel")]
    SearchRegion,
}

/// Tunable guiding parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiStarConfig {
    pub strategy: StrategyKind,
    /// Use secondary stars in addition to the primary
    pub multi_star_mode: bool,
    /// Half-width of the star search box (pixels)
    pub search_region: u32,
    pub mass_change_threshold_enabled: bool,
    /// Allowed fractional flux excursion before a detection is rejected
    pub mass_change_threshold: f64,
    pub tolerate_jumps_enabled: bool,
    /// Multiple of the smoothed error beyond which an offset is a jump
    pub tolerate_jumps_threshold: f64,
}

impl Default for MultiStarConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::MultiStar,
            multi_star_mode: true,
            search_region: 15,
            mass_change_threshold_enabled: true,
            mass_change_threshold: 0.5,
            tolerate_jumps_enabled: true,
            tolerate_jumps_threshold: 4.0,
        }
    }
}

impl MultiStarConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.mass_change_threshold > 0.0 && self.mass_change_threshold <= 1.0) {
            return Err(ConfigError::MassThreshold(self.mass_change_threshold));
        }
        if !(self.tolerate_jumps_threshold > 0.0 && self.tolerate_jumps_threshold.is_finite()) {
            return Err(ConfigError::JumpThreshold(self.tolerate_jumps_threshold));
        }
        if self.search_region == 0 {
            return Err(ConfigError::SearchRegion);
        }
        Ok(())
    }

    /// Mass threshold to apply, None when the filter is disabled
    pub fn mass_threshold(&self) -> Option<f64> {
        self.mass_change_threshold_enabled
            .then_some(self.mass_change_threshold)
    }

    /// Jump tolerance to apply, None when the distance test is disabled
    pub fn jump_tolerance(&self) -> Option<f64> {
        self.tolerate_jumps_enabled
            .then_some(self.tolerate_jumps_threshold)
    }

    /// Save as pretty JSON
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON and validate; missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
