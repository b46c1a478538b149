//! EXIF extraction for survey imagery
//!
//! Walks an image folder, reads the capture time and GPS block from every
//! image and produces one [`ImageRecord`] per file. A corrupt or EXIF-less
//! file only blanks the fields it could not provide; it never stops the scan.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use exif::{Exif, In, Reader, Tag, Value};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::deadline::{run_with_deadline, DeadlineError};
use crate::error::ExtractError;
use crate::gps::dms_to_decimal;
use crate::record::{normalize_path, ImageRecord};
use crate::report::StageReport;
use crate::timestamp::{parse_capture_time, with_subsec};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff"];

/// Fields read from a single image's EXIF block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureMetadata {
    pub timestamp: Option<NaiveDateTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

impl CaptureMetadata {
    pub fn from_exif(exif: &Exif) -> Self {
        let timestamp = ascii_field(exif, Tag::DateTimeOriginal)
            .and_then(|raw| parse_capture_time(&raw))
            .or_else(|| ascii_field(exif, Tag::DateTime).and_then(|raw| parse_capture_time(&raw)))
            .map(|dt| match ascii_field(exif, Tag::SubSecTimeOriginal) {
                Some(subsec) => with_subsec(dt, &subsec),
                None => dt,
            });

        let altitude = rational_values(exif, Tag::GPSAltitude)
            .and_then(|values| values.first().copied())
            .map(|alt| {
                // Ref 1 means below sea level
                let below = exif
                    .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
                    .and_then(|f| f.value.get_uint(0))
                    == Some(1);
                if below { -alt } else { alt }
            });

        Self {
            timestamp,
            latitude: coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
            longitude: coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
            altitude,
        }
    }

    fn apply_to(&self, record: &mut ImageRecord) {
        record.timestamp = self.timestamp;
        record.latitude = self.latitude;
        record.longitude = self.longitude;
        record.altitude = self.altitude;
    }
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end_matches('\0').trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn rational_values(exif: &Exif, tag: Tag) -> Option<Vec<f64>> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(values) => {
            let converted: Vec<f64> = values.iter().map(|r| r.to_f64()).collect();
            if converted.iter().all(|v| v.is_finite()) {
                Some(converted)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let values = rational_values(exif, value_tag)?;
    let reference = ascii_field(exif, ref_tag)?;
    match values.as_slice() {
        [degrees, minutes, seconds] => Some(dms_to_decimal(*degrees, *minutes, *seconds, &reference)),
        _ => {
            debug!("Ignoring {:?} with {} components", value_tag, values.len());
            None
        }
    }
}

/// Read capture time and GPS from one image file
pub fn read_capture_metadata(path: &Path) -> Result<CaptureMetadata, ExtractError> {
    let file = File::open(path).map_err(|source| ExtractError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let exif = Reader::new()
        .read_from_container(&mut reader)
        .map_err(|source| ExtractError::Exif {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(CaptureMetadata::from_exif(&exif))
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Recursively list image files under `root` in discovery order
/// (file-name order at every directory level)
pub fn discover_images(root: &Path) -> Result<Vec<PathBuf>> {
    discover_images_excluding(root, None)
}

fn discover_images_excluding(root: &Path, excluded: Option<&Path>) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Image folder is not a directory: {}", root.display());
    }

    // Compare resolved paths so relative and absolute spellings of the same folder match
    let excluded = excluded.and_then(|dir| dir.canonicalize().ok());
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match &excluded {
            Some(dir) if entry.file_type().is_dir() => entry
                .path()
                .canonicalize()
                .map_or(true, |path| !path.starts_with(dir)),
            _ => true,
        });

    let mut paths = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable directory entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() && is_image_file(entry.path()) {
            paths.push(PathBuf::from(normalize_path(&entry.path().to_string_lossy())));
        }
    }
    Ok(paths)
}

pub struct MetadataExtractor {
    deadline: Duration,
    excluded_dir: Option<PathBuf>,
}

impl MetadataExtractor {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            excluded_dir: None,
        }
    }

    /// Leave a directory (typically the crop output folder) out of discovery
    pub fn excluding(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded_dir = Some(dir.into());
        self
    }

    /// Extract one record per image under `root`, in discovery order
    pub fn extract_folder(&self, root: &Path) -> Result<(Vec<ImageRecord>, StageReport)> {
        let paths = discover_images_excluding(root, self.excluded_dir.as_deref())?;
        info!("Found {} image files under {}", paths.len(), root.display());

        // Order is preserved by the indexed parallel iterator
        let outcomes: Vec<(PathBuf, Result<CaptureMetadata, ExtractError>)> = paths
            .into_par_iter()
            .map(|path| {
                let outcome = self.extract_one(&path);
                (path, outcome)
            })
            .collect();

        let mut report = StageReport::new("extract");
        let mut records = Vec::with_capacity(outcomes.len());
        for (path, outcome) in outcomes {
            let mut record = ImageRecord::new(path);
            match outcome {
                Ok(metadata) => {
                    metadata.apply_to(&mut record);
                    if record.timestamp.is_some() {
                        report.success();
                    } else {
                        report.skip(Some(&record.filepath), "no readable capture timestamp");
                    }
                }
                Err(e @ ExtractError::Exif { .. }) => {
                    report.skip(Some(&record.filepath), e.to_string());
                }
                Err(e) => {
                    report.fail(Some(&record.filepath), e.to_string());
                }
            }
            records.push(record);
        }

        report.log_summary();
        Ok((records, report))
    }

    /// Read one file's metadata under the per-file deadline
    pub fn extract_one(&self, path: &Path) -> Result<CaptureMetadata, ExtractError> {
        let owned = path.to_path_buf();
        match run_with_deadline(self.deadline, move || read_capture_metadata(&owned)) {
            Ok(outcome) => outcome,
            Err(DeadlineError::TimedOut(limit)) => Err(ExtractError::TimedOut(limit)),
            Err(other) => Err(ExtractError::Worker(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_image_extension_filter() {
        assert!(is_image_file(Path::new("a/0/IMG_0001.JPG")));
        assert!(is_image_file(Path::new("a/0/IMG_0001.jpeg")));
        assert!(is_image_file(Path::new("a/0/scan.png")));
        assert!(!is_image_file(Path::new("a/0/notes.txt")));
        assert!(!is_image_file(Path::new("a/0/final_metadata.csv")));
        assert!(!is_image_file(Path::new("a/0/noext")));
    }

    #[test]
    fn test_discovery_is_recursive_and_sorted() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("1"))?;
        fs::create_dir_all(dir.path().join("0"))?;
        fs::write(dir.path().join("1").join("b.jpg"), b"x")?;
        fs::write(dir.path().join("0").join("c.jpg"), b"x")?;
        fs::write(dir.path().join("0").join("a.JPG"), b"x")?;
        fs::write(dir.path().join("0").join("readme.txt"), b"x")?;

        let paths = discover_images(dir.path())?;
        let names: Vec<String> = paths
            .iter()
            .map(|p| {
                let folder = p.parent().unwrap().file_name().unwrap().to_string_lossy().to_string();
                let file = p.file_name().unwrap().to_string_lossy().to_string();
                format!("{}/{}", folder, file)
            })
            .collect();
        assert_eq!(names, vec!["0/a.JPG", "0/c.jpg", "1/b.jpg"]);
        Ok(())
    }

    #[test]
    fn test_discovery_skips_excluded_dir() -> Result<()> {
        let dir = tempdir()?;
        let output = dir.path().join("cropped_images_on_tx");
        fs::create_dir_all(dir.path().join("0"))?;
        fs::create_dir_all(&output)?;
        fs::write(dir.path().join("0").join("a.jpg"), b"x")?;
        fs::write(output.join("0_000_00_001.jpg"), b"x")?;

        let paths = discover_images_excluding(dir.path(), Some(&output))?;
        assert_eq!(paths.len(), 1);
        Ok(())
    }

    #[test]
    fn test_discovery_excludes_differently_spelled_dir() -> Result<()> {
        let dir = tempdir()?;
        let output = dir.path().join("cropped_images_on_tx");
        fs::create_dir_all(dir.path().join("0"))?;
        fs::create_dir_all(&output)?;
        fs::write(dir.path().join("0").join("a.jpg"), b"x")?;
        fs::write(output.join("0_000_00_001.jpg"), b"x")?;

        let spelled = dir.path().join("0").join("..").join("cropped_images_on_tx");
        let paths = discover_images_excluding(dir.path(), Some(&spelled))?;
        assert_eq!(paths.len(), 1);

        // not created yet, so nothing to leave out
        let missing = dir.path().join("not_created");
        assert_eq!(discover_images_excluding(dir.path(), Some(&missing))?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_discovery_requires_directory() {
        assert!(discover_images(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_corrupt_files_do_not_abort_extraction() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("0"))?;
        fs::write(dir.path().join("0").join("corrupt.jpg"), b"not a jpeg at all")?;
        fs::write(dir.path().join("0").join("empty.jpg"), b"")?;

        let extractor = MetadataExtractor::new(Duration::from_secs(5));
        let (records, report) = extractor.extract_folder(dir.path())?;

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.timestamp.is_none() && r.altitude.is_none()));
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.skipped + report.failed, 2);
        Ok(())
    }

    fn field(tag: Tag, value: Value) -> exif::Field {
        exif::Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        }
    }

    fn rationals(values: &[(u32, u32)]) -> Value {
        Value::Rational(values.iter().map(|&(num, denom)| exif::Rational { num, denom }).collect())
    }

    fn exif_from_fields(fields: &[exif::Field]) -> Exif {
        let mut writer = exif::experimental::Writer::new();
        for f in fields {
            writer.push_field(f);
        }
        let mut buffer = std::io::Cursor::new(Vec::new());
        writer.write(&mut buffer, false).unwrap();
        Reader::new().read_raw(buffer.into_inner()).unwrap()
    }

    #[test]
    fn test_capture_metadata_from_exif() {
        let fields = vec![
            field(Tag::DateTimeOriginal, Value::Ascii(vec![b"2024:06:01 10:15:30".to_vec()])),
            field(Tag::SubSecTimeOriginal, Value::Ascii(vec![b"25".to_vec()])),
            field(Tag::GPSLatitudeRef, Value::Ascii(vec![b"S".to_vec()])),
            field(Tag::GPSLatitude, rationals(&[(36, 1), (36, 1), (36000, 1000)])),
            field(Tag::GPSLongitudeRef, Value::Ascii(vec![b"W".to_vec()])),
            field(Tag::GPSLongitude, rationals(&[(121, 1), (54, 1), (0, 1)])),
            field(Tag::GPSAltitudeRef, Value::Byte(vec![1])),
            field(Tag::GPSAltitude, rationals(&[(12500, 1000)])),
        ];
        let metadata = CaptureMetadata::from_exif(&exif_from_fields(&fields));

        let expected = parse_capture_time("2024-06-01 10:15:30.25").unwrap();
        assert_eq!(metadata.timestamp, Some(expected));
        assert!((metadata.latitude.unwrap() + 36.61).abs() < 1e-9);
        assert!((metadata.longitude.unwrap() + 121.9).abs() < 1e-9);
        assert!((metadata.altitude.unwrap() + 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_partial_gps_blanks_only_affected_fields() {
        let fields = vec![
            field(Tag::DateTime, Value::Ascii(vec![b"2024-06-01 10:15:30".to_vec()])),
            // Latitude without its reference is unusable
            field(Tag::GPSLatitude, rationals(&[(36, 1), (36, 1), (0, 1)])),
            field(Tag::GPSAltitude, rationals(&[(200, 1)])),
        ];
        let metadata = CaptureMetadata::from_exif(&exif_from_fields(&fields));

        assert!(metadata.timestamp.is_some());
        assert!(metadata.latitude.is_none());
        assert!(metadata.longitude.is_none());
        assert_eq!(metadata.altitude, Some(200.0));
    }

    #[test]
    fn test_missing_file_is_an_open_error() {
        let result = read_capture_metadata(Path::new("/definitely/not/here.jpg"));
        assert!(matches!(result, Err(ExtractError::Open { .. })));
    }
}
