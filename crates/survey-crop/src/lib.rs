//! Renumbering, cropping and GPS re-embedding for survey imagery
//!
//! Takes the record table produced by `survey-metadata`, selects the images
//! that belong to a transect and were flown inside the altitude window, gives
//! each a deterministic per-camera filename and writes a border-cropped JPEG
//! carrying the (possibly corrected) GPS position.
//!
//! # Stages
//!
//! - **Renumbering** ([`renumber`]): single-threaded, discovery order, all
//!   names assigned before any I/O
//! - **Cropping** ([`crop`], [`geotag`]): one JPEG per selected record
//! - **Runner** ([`runner`]): parallel execution with per-file deadlines,
//!   cancellation and a single merge back into the table

pub mod crop;
pub mod error;
pub mod geotag;
pub mod renumber;
pub mod runner;

pub use crop::{crop_bounds, crop_image, encode_jpeg, render_crop, write_output, CropBounds, CropJob, RenderedCrop};
pub use error::{ConfigError, CropError};
pub use geotag::{encode_tiff, gps_fields, insert_exif_segment, output_fields, GpsFix};
pub use renumber::{assign_filenames, crop_filename, is_selected, CameraCounters, CropPlan};
pub use runner::{CropProgress, ImageCropper};

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// What happens to the source image's EXIF block in the cropped output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExifPolicy {
    /// Copy primary-IFD fields, rewriting pixel dimensions and GPS
    #[default]
    Preserve,
    /// Write only the GPS correction, if any
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    /// Pixels removed from each edge
    pub crop_amount_px: u32,
    pub min_altitude: f64,
    pub max_altitude: f64,
    /// Parent folder names recognized as camera identifiers
    pub camera_prefixes: Vec<String>,
    pub jpeg_quality: u8,
    pub exif_policy: ExifPolicy,
    pub per_file_deadline_secs: u64,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            crop_amount_px: 125,
            min_altitude: 152.0,
            max_altitude: 244.0,
            camera_prefixes: vec!["0".to_string(), "1".to_string()],
            jpeg_quality: 100,
            exif_policy: ExifPolicy::Preserve,
            per_file_deadline_secs: 30,
        }
    }
}

impl CropConfig {
    pub fn per_file_deadline(&self) -> Duration {
        Duration::from_secs(self.per_file_deadline_secs)
    }

    /// Reject settings that would make every record fail
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_altitude.is_finite() || !self.max_altitude.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "min_altitude/max_altitude",
                reason: "altitudes must be finite".to_string(),
            });
        }
        if self.min_altitude > self.max_altitude {
            return Err(ConfigError::AltitudeRange {
                min: self.min_altitude,
                max: self.max_altitude,
            });
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::InvalidValue {
                field: "jpeg_quality",
                reason: format!("{} is outside 1..=100", self.jpeg_quality),
            });
        }
        if self.camera_prefixes.is_empty() || self.camera_prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "camera_prefixes",
                reason: "at least one non-empty prefix is required".to_string(),
            });
        }
        if self.per_file_deadline_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "per_file_deadline_secs",
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}
