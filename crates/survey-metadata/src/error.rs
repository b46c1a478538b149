use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a single image produced no metadata
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable EXIF in {path}: {source}")]
    Exif {
        path: PathBuf,
        #[source]
        source: exif::Error,
    },

    #[error("metadata read exceeded the {0:?} deadline")]
    TimedOut(Duration),

    #[error("metadata worker failed: {0}")]
    Worker(String),
}

/// Problems with an input table that stop a stage before it does any work
#[derive(Debug, Error)]
pub enum TableError {
    #[error("{table} is missing required column(s): {columns}")]
    MissingColumns { table: String, columns: String },

    #[error("{table} has no usable rows")]
    Empty { table: String },
}

/// A transect end could not be snapped to an image
#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("no positioned image within {max_distance_m} m of ({latitude}, {longitude})")]
    NoImageNear {
        latitude: f64,
        longitude: f64,
        max_distance_m: f64,
    },
}
