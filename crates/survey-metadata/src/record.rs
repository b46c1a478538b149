//! Canonical per-image record shared by every pipeline stage

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Source image path, normalized to forward slashes. Never changes after discovery.
    pub filepath: PathBuf,
    /// Capture time from EXIF. Later stages read it but never rewrite it.
    pub timestamp: Option<NaiveDateTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub transect_id: Option<String>,
    /// Set when the GPS fields were overwritten from the external track
    pub gps_corrected: bool,
    /// Signed offset (track point time minus capture time) of the matched track point
    pub track_offset_ms: Option<i64>,
    pub new_filename: Option<String>,
    pub new_filepath: Option<PathBuf>,
}

impl ImageRecord {
    /// Create an empty record for a discovered file
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: filepath.into(),
            timestamp: None,
            latitude: None,
            longitude: None,
            altitude: None,
            transect_id: None,
            gps_corrected: false,
            track_offset_ms: None,
            new_filename: None,
            new_filepath: None,
        }
    }

    /// Name of the immediate parent directory, used as the camera identifier
    pub fn camera_folder(&self) -> Option<&str> {
        self.filepath.parent()?.file_name()?.to_str()
    }

    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Forget any output naming from a previous cropping run
    pub fn clear_output(&mut self) {
        self.new_filename = None;
        self.new_filepath = None;
    }

    pub fn path_key(&self) -> String {
        normalize_path(&self.filepath.to_string_lossy())
    }
}

/// Normalize a path reference so Windows-style and POSIX-style spellings compare equal
pub fn normalize_path(path: &str) -> String {
    path.trim().replace('\\', "/")
}

/// Filepath-keyed lookup built once per stage
#[derive(Debug, Default)]
pub struct RecordIndex {
    by_path: HashMap<String, usize>,
}

impl RecordIndex {
    pub fn build(records: &[ImageRecord]) -> Self {
        let mut by_path = HashMap::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let key = record.path_key();
            if by_path.contains_key(&key) {
                warn!("Duplicate record for {}; keeping the first occurrence", key);
                continue;
            }
            by_path.insert(key, index);
        }
        Self { by_path }
    }

    /// Look up a record index by a (possibly backslash-separated) path reference
    pub fn get(&self, path: &str) -> Option<usize> {
        self.by_path.get(&normalize_path(path)).copied()
    }

    pub fn get_path(&self, path: &Path) -> Option<usize> {
        self.get(&path.to_string_lossy())
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}
