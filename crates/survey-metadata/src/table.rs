//! Record table persistence
//!
//! The table is rewritten after every stage so a run can be audited or
//! resumed from a later stage. Missing values are written as `NA`.

use std::fs::File;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::TableError;
use crate::record::{normalize_path, ImageRecord};
use crate::timestamp::{format_timestamp, parse_capture_time};

const MISSING: &str = "NA";

pub const COLUMNS: [&str; 10] = [
    "Filepath",
    "DatetimeOriginal",
    "Latitude",
    "Longitude",
    "Altitude",
    "Transect",
    "GpsCorrected",
    "TrackOffsetMs",
    "NewFilename",
    "NewFilepath",
];

fn or_missing<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| MISSING.to_string())
}

fn cell(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("na") && !v.eq_ignore_ascii_case("nan"))
}

fn to_row(record: &ImageRecord) -> [String; 10] {
    [
        record.path_key(),
        or_missing(record.timestamp.as_ref().map(format_timestamp)),
        or_missing(record.latitude),
        or_missing(record.longitude),
        or_missing(record.altitude),
        or_missing(record.transect_id.as_deref()),
        record.gps_corrected.to_string(),
        or_missing(record.track_offset_ms),
        or_missing(record.new_filename.as_deref()),
        or_missing(record.new_filepath.as_ref().map(|p| normalize_path(&p.to_string_lossy()))),
    ]
}

/// Atomically replace `path` with the given records
pub fn write_table(path: &Path, records: &[ImageRecord]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create table directory: {}", dir.display()))?;

    let mut temp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    {
        let mut writer = csv::Writer::from_writer(temp.as_file_mut());
        writer.write_record(COLUMNS)?;
        for record in records {
            writer.write_record(to_row(record))?;
        }
        writer.flush()?;
    }
    temp.as_file_mut().sync_all()?;
    temp.persist(path)
        .with_context(|| format!("Failed to replace table: {}", path.display()))?;

    info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

/// Read a table written by [`write_table`]. Only `Filepath` is required;
/// absent columns read as missing values.
pub fn read_table(path: &Path) -> Result<Vec<ImageRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open table: {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let filepath_col = column("Filepath").ok_or_else(|| TableError::MissingColumns {
        table: path.display().to_string(),
        columns: "Filepath".to_string(),
    })?;
    let timestamp_col = column("DatetimeOriginal");
    let lat_col = column("Latitude");
    let lon_col = column("Longitude");
    let alt_col = column("Altitude");
    let transect_col = column("Transect");
    let corrected_col = column("GpsCorrected");
    let offset_col = column("TrackOffsetMs");
    let name_col = column("NewFilename");
    let out_col = column("NewFilepath");

    let mut records = Vec::new();
    for (row_number, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Bad row {} in {}", row_number + 1, path.display()))?;
        let get = |col: Option<usize>| cell(col.and_then(|c| row.get(c)));
        let number = |col: Option<usize>| get(col).and_then(|v| v.parse::<f64>().ok());

        let Some(filepath) = get(Some(filepath_col)) else {
            debug!("Row {} of {} has no filepath", row_number + 1, path.display());
            continue;
        };
        let mut record = ImageRecord::new(normalize_path(filepath));
        record.timestamp = get(timestamp_col).and_then(parse_capture_time);
        record.latitude = number(lat_col);
        record.longitude = number(lon_col);
        record.altitude = number(alt_col);
        record.transect_id = get(transect_col).map(str::to_string);
        record.gps_corrected = get(corrected_col).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);
        record.track_offset_ms = get(offset_col).and_then(|v| v.parse::<i64>().ok());
        record.new_filename = get(name_col).map(str::to_string);
        record.new_filepath = get(out_col).map(PathBuf::from);
        records.push(record);
    }

    if records.is_empty() {
        return Err(TableError::Empty {
            table: path.display().to_string(),
        }
        .into());
    }
    info!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Vec<ImageRecord> {
        let mut full = ImageRecord::new("survey/0/IMG_0001.jpg");
        full.timestamp = parse_capture_time("2024:06:01 10:00:00.250");
        full.latitude = Some(36.123456789);
        full.longitude = Some(-121.5);
        full.altitude = Some(-3.25);
        full.transect_id = Some("T1".to_string());
        full.gps_corrected = true;
        full.track_offset_ms = Some(-1500);
        full.new_filename = Some("0_000_00_001.jpg".to_string());
        full.new_filepath = Some(PathBuf::from("out/Images/0_000_00_001.jpg"));

        vec![full, ImageRecord::new("survey\\1\\IMG_0002.jpg")]
    }

    #[test]
    fn test_write_then_read_preserves_records() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("metadata.csv");
        let records = sample();

        write_table(&path, &records)?;
        let back = read_table(&path)?;

        assert_eq!(back[0], records[0]);
        assert_eq!(back[1].filepath, PathBuf::from("survey/1/IMG_0002.jpg"));
        assert!(back[1].timestamp.is_none());
        assert!(!back[1].gps_corrected);
        Ok(())
    }

    #[test]
    fn test_missing_values_render_as_na() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("metadata.csv");
        write_table(&path, &sample()[1..])?;
        let text = std::fs::read_to_string(&path)?;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(COLUMNS.join(",").as_str()));
        assert_eq!(lines.next(), Some("survey/1/IMG_0002.jpg,NA,NA,NA,NA,NA,false,NA,NA,NA"));
        Ok(())
    }

    #[test]
    fn test_rewrite_replaces_previous_table() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("metadata.csv");
        write_table(&path, &sample())?;
        write_table(&path, &sample()[..1])?;
        assert_eq!(read_table(&path)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_read_minimal_table() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("hand_made.csv");
        std::fs::write(&path, "Filepath,DatetimeOriginal,Altitude\na/0/x.jpg,2024:06:01 10:00:00,nan\n")?;

        let records = read_table(&path)?;
        assert_eq!(records[0].timestamp, parse_capture_time("2024-06-01 10:00:00"));
        assert!(records[0].altitude.is_none());
        Ok(())
    }

    #[test]
    fn test_read_requires_filepath_column() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Name,Altitude\nx,1\n")?;

        let err = read_table(&path).unwrap_err();
        assert!(err.downcast_ref::<TableError>().is_some());
        Ok(())
    }
}
