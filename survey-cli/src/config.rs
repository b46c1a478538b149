//! Pipeline configuration
//!
//! Every field has a default, so a JSON file only needs the values it
//! changes. Command-line flags are applied on top before validation.

use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use survey_crop::{ConfigError, CropConfig, ExifPolicy};
use survey_metadata::{AlignConfig, AlignPolicy, DEFAULT_MAX_DISTANCE_M};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest gap (seconds) between a capture and the track point that replaces its GPS
    pub tolerance_seconds: f64,
    pub crop_amount_px: u32,
    pub min_altitude: f64,
    pub max_altitude: f64,
    pub camera_prefixes: Vec<String>,
    pub jpeg_quality: u8,
    pub exif_policy: ExifPolicy,
    pub align_policy: AlignPolicy,
    pub per_file_deadline_secs: u64,
    /// How far (metres) a map point may be from the image it snaps to
    pub boundary_max_distance_m: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let crop = CropConfig::default();
        let align = AlignConfig::default();
        Self {
            tolerance_seconds: align.tolerance_seconds,
            crop_amount_px: crop.crop_amount_px,
            min_altitude: crop.min_altitude,
            max_altitude: crop.max_altitude,
            camera_prefixes: crop.camera_prefixes,
            jpeg_quality: crop.jpeg_quality,
            exif_policy: crop.exif_policy,
            align_policy: align.policy,
            per_file_deadline_secs: crop.per_file_deadline_secs,
            boundary_max_distance_m: DEFAULT_MAX_DISTANCE_M,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance_seconds.is_finite() || self.tolerance_seconds < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "tolerance_seconds",
                reason: format!("{} is not a non-negative number of seconds", self.tolerance_seconds),
            });
        }
        if !self.boundary_max_distance_m.is_finite() || self.boundary_max_distance_m < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "boundary_max_distance_m",
                reason: format!("{} is not a non-negative distance", self.boundary_max_distance_m),
            });
        }
        self.crop_config().validate()
    }

    pub fn align_config(&self) -> AlignConfig {
        AlignConfig {
            tolerance_seconds: self.tolerance_seconds,
            policy: self.align_policy,
        }
    }

    pub fn crop_config(&self) -> CropConfig {
        CropConfig {
            crop_amount_px: self.crop_amount_px,
            min_altitude: self.min_altitude,
            max_altitude: self.max_altitude,
            camera_prefixes: self.camera_prefixes.clone(),
            jpeg_quality: self.jpeg_quality,
            exif_policy: self.exif_policy,
            per_file_deadline_secs: self.per_file_deadline_secs,
        }
    }

    pub fn per_file_deadline(&self) -> Duration {
        Duration::from_secs(self.per_file_deadline_secs)
    }
}
