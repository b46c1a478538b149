use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why one selected record produced no cropped output
#[derive(Debug, Error)]
pub enum CropError {
    #[error("source image not found: {0}")]
    SourceMissing(PathBuf),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("crop of {crop}px per edge does not fit a {width}x{height} image")]
    BoundsViolation { width: u32, height: u32, crop: u32 },

    #[error("failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),

    #[error("failed to build EXIF block: {0}")]
    Exif(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("crop exceeded the {0:?} per-file deadline")]
    TimedOut(Duration),

    #[error("crop worker failed: {0}")]
    Worker(String),

    #[error("cancelled before processing")]
    Cancelled,
}

/// Settings that stop the crop stage before any output is written
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("min_altitude {min} is greater than max_altitude {max}")]
    AltitudeRange { min: f64, max: f64 },

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("crop of {crop}px per edge fits none of the selected images (largest is {width}x{height})")]
    CropTooLarge { crop: u32, width: u32, height: u32 },
}
