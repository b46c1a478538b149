//! Deterministic output naming
//!
//! Runs sequentially in discovery order before any image is touched, so the
//! same table always produces the same names regardless of how the crop work
//! is later scheduled.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use survey_metadata::{ImageRecord, StageReport};

use crate::CropConfig;

/// Next-used counter per camera prefix. Callers start a run with an empty map.
pub type CameraCounters = BTreeMap<String, u32>;

/// A selected record with its assigned output location
#[derive(Debug, Clone, PartialEq)]
pub struct CropPlan {
    pub index: usize,
    pub source: PathBuf,
    pub destination: PathBuf,
}

pub fn crop_filename(prefix: &str, counter: u32) -> String {
    format!("{}_000_00_{:03}.jpg", prefix, counter)
}

/// On a transect and flown inside the altitude window (inclusive)
pub fn is_selected(record: &ImageRecord, config: &CropConfig) -> bool {
    record.transect_id.is_some()
        && record
            .altitude
            .map(|alt| config.min_altitude <= alt && alt <= config.max_altitude)
            .unwrap_or(false)
}

/// Assign `new_filename`/`new_filepath` to every selected record.
///
/// Previous output fields are cleared on all records first. Returns the
/// updated counters and one plan per named record, in record order.
pub fn assign_filenames(
    records: &mut [ImageRecord],
    output_dir: &Path,
    config: &CropConfig,
    mut counters: CameraCounters,
    report: &mut StageReport,
) -> (CameraCounters, Vec<CropPlan>) {
    let mut plans = Vec::new();

    for (index, record) in records.iter_mut().enumerate() {
        record.clear_output();
        if !is_selected(record, config) {
            let reason = if record.transect_id.is_none() {
                "not on a transect"
            } else {
                "altitude outside the crop window"
            };
            report.skip(Some(&record.filepath), reason);
            continue;
        }

        let prefix = match record.camera_folder() {
            Some(folder) if config.camera_prefixes.iter().any(|p| p == folder) => folder.to_string(),
            other => {
                report.skip(
                    Some(&record.filepath),
                    format!("unrecognized camera folder {:?}", other.unwrap_or("")),
                );
                continue;
            }
        };

        let counter = counters.entry(prefix.clone()).or_insert(0);
        *counter += 1;
        let filename = crop_filename(&prefix, *counter);
        let destination = output_dir.join(&filename);

        record.new_filename = Some(filename);
        record.new_filepath = Some(destination.clone());
        plans.push(CropPlan {
            index,
            source: record.filepath.clone(),
            destination,
        });
    }

    (counters, plans)
}
