//! Transect boundary definitions and time-range assignment
//!
//! A boundary row names a transect and gives its start and end either as
//! image references (`start_img`/`end_img`) or literal times
//! (`start_time`/`end_time`). References are resolved into concrete ranges by
//! [`crate::align::resolve_boundaries`]; [`assign_transects`] then labels
//! every record captured inside a range.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::TableError;
use crate::record::{normalize_path, ImageRecord};
use crate::report::StageReport;
use crate::timestamp::{format_timestamp, parse_capture_time};

pub const BOUNDARY_COLUMNS: [&str; 5] = ["transect_id", "start_img", "end_img", "start_time", "end_time"];

/// One end of a transect. Either form may be absent; when both are present
/// the image reference takes precedence if it resolves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRef {
    pub image: Option<String>,
    pub time: Option<NaiveDateTime>,
}

impl BoundaryRef {
    pub fn image(path: &str) -> Self {
        Self {
            image: Some(normalize_path(path)),
            time: None,
        }
    }

    pub fn time(time: NaiveDateTime) -> Self {
        Self {
            image: None,
            time: Some(time),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransectBoundary {
    pub transect_id: String,
    pub start_ref: BoundaryRef,
    pub end_ref: BoundaryRef,
}

/// A boundary with both ends pinned to capture times; inclusive on both ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBoundary {
    pub transect_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ResolvedBoundary {
    pub fn contains(&self, timestamp: &NaiveDateTime) -> bool {
        self.start <= *timestamp && *timestamp <= self.end
    }
}

#[derive(Debug, Deserialize)]
struct BoundaryRow {
    transect_id: Option<String>,
    #[serde(default)]
    start_img: Option<String>,
    #[serde(default)]
    end_img: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

/// Treat the sentinels spreadsheet tools leave behind as empty cells
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !matches!(v.to_ascii_lowercase().as_str(), "na" | "nan" | "none"))
}

pub fn load_boundaries(path: &Path) -> Result<(Vec<TransectBoundary>, StageReport)> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open transect table: {}", path.display()))?;
    let mut report = StageReport::new("boundaries");
    let boundaries = parse_boundaries(file, &mut report)
        .with_context(|| format!("Failed to read transect table: {}", path.display()))?;
    info!("Loaded {} transect boundaries from {}", boundaries.len(), path.display());
    Ok((boundaries, report))
}

/// Parse a boundary table. Requires `transect_id` and at least one complete
/// pair of `start_img`/`end_img` or `start_time`/`end_time` columns.
pub fn parse_boundaries<R: Read>(reader: R, report: &mut StageReport) -> Result<Vec<TransectBoundary>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let has = |name: &str| headers.iter().any(|h| h == name);

    let has_images = has("start_img") && has("end_img");
    let has_times = has("start_time") && has("end_time");
    if !has("transect_id") || !(has_images || has_times) {
        let mut missing = Vec::new();
        if !has("transect_id") {
            missing.push("transect_id");
        }
        if !(has_images || has_times) {
            missing.push("start_img/end_img or start_time/end_time");
        }
        return Err(TableError::MissingColumns {
            table: "transect boundaries".to_string(),
            columns: missing.join(", "),
        }
        .into());
    }

    let mut boundaries = Vec::new();
    for (row_number, row) in csv_reader.deserialize::<BoundaryRow>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                report.skip(None, format!("boundary row {}: {}", row_number + 1, e));
                continue;
            }
        };

        let Some(transect_id) = present(row.transect_id) else {
            report.skip(None, format!("boundary row {} has no transect_id", row_number + 1));
            continue;
        };

        let mut parse_time = |raw: Option<String>| {
            let raw = present(raw)?;
            let parsed = parse_capture_time(&raw);
            if parsed.is_none() {
                report.warn(None, format!("transect {}: unparsable time '{}'", transect_id, raw));
            }
            parsed
        };
        let start_time = parse_time(row.start_time);
        let end_time = parse_time(row.end_time);

        boundaries.push(TransectBoundary {
            start_ref: BoundaryRef {
                image: present(row.start_img).map(|p| normalize_path(&p)),
                time: start_time,
            },
            end_ref: BoundaryRef {
                image: present(row.end_img).map(|p| normalize_path(&p)),
                time: end_time,
            },
            transect_id,
        });
        report.success();
    }
    Ok(boundaries)
}

fn boundary_cell(boundary: &TransectBoundary, column: &str) -> String {
    let image = |r: &BoundaryRef| r.image.clone();
    let time = |r: &BoundaryRef| r.time.as_ref().map(format_timestamp);
    let value = match column {
        "transect_id" => Some(boundary.transect_id.clone()),
        "start_img" => image(&boundary.start_ref),
        "end_img" => image(&boundary.end_ref),
        "start_time" => time(&boundary.start_ref),
        "end_time" => time(&boundary.end_ref),
        _ => None,
    };
    value.unwrap_or_else(|| "NA".to_string())
}

/// Add one row to a boundary table, creating the table if needed.
///
/// An existing table keeps its column order; it must carry every column in
/// [`BOUNDARY_COLUMNS`]. The file is replaced atomically.
pub fn append_boundary(path: &Path, boundary: &TransectBoundary) -> Result<()> {
    let existing = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read transect table: {}", path.display()));
        }
    };

    let mut contents = existing.clone();
    let columns: Vec<String> = if existing.iter().all(u8::is_ascii_whitespace) {
        contents.clear();
        let mut writer = csv::Writer::from_writer(&mut contents);
        writer.write_record(BOUNDARY_COLUMNS)?;
        writer.flush()?;
        drop(writer);
        BOUNDARY_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        let headers = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(existing.as_slice())
            .headers()?
            .clone();
        let missing: Vec<&str> = BOUNDARY_COLUMNS
            .into_iter()
            .filter(|c| !headers.iter().any(|h| h == *c))
            .collect();
        if !missing.is_empty() {
            return Err(TableError::MissingColumns {
                table: path.display().to_string(),
                columns: missing.join(", "),
            }
            .into());
        }
        if !contents.ends_with(b"\n") {
            contents.push(b'\n');
        }
        headers.iter().map(str::to_string).collect()
    };

    {
        let mut writer = csv::Writer::from_writer(&mut contents);
        writer.write_record(columns.iter().map(|c| boundary_cell(boundary, c)))?;
        writer.flush()?;
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    let mut temp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    std::io::Write::write_all(temp.as_file_mut(), &contents)?;
    temp.as_file_mut().sync_all()?;
    temp.persist(path)
        .with_context(|| format!("Failed to replace transect table: {}", path.display()))?;

    info!("Added transect {} to {}", boundary.transect_id, path.display());
    Ok(())
}

/// Label records with the transect whose range contains their capture time.
///
/// Boundaries are applied in definition order over the whole record set, so
/// where ranges overlap the later-defined transect wins. Records outside
/// every range end up with no transect. Any previous labels are discarded.
pub fn assign_transects(
    mut records: Vec<ImageRecord>,
    boundaries: &[ResolvedBoundary],
) -> (Vec<ImageRecord>, StageReport) {
    let mut report = StageReport::new("assign");
    let mut assigned_by: Vec<Option<usize>> = vec![None; records.len()];
    let mut overlaps: BTreeMap<(usize, usize), usize> = BTreeMap::new();

    for record in records.iter_mut() {
        record.transect_id = None;
    }

    for (boundary_index, boundary) in boundaries.iter().enumerate() {
        for (record, owner) in records.iter_mut().zip(assigned_by.iter_mut()) {
            let Some(timestamp) = record.timestamp else { continue };
            if !boundary.contains(&timestamp) {
                continue;
            }
            if let Some(previous) = *owner {
                *overlaps.entry((previous, boundary_index)).or_default() += 1;
            }
            record.transect_id = Some(boundary.transect_id.clone());
            *owner = Some(boundary_index);
        }
    }

    for ((earlier, later), count) in overlaps {
        report.warn(
            None,
            format!(
                "transects '{}' and '{}' overlap; {} image(s) reassigned to '{}'",
                boundaries[earlier].transect_id, boundaries[later].transect_id, count, boundaries[later].transect_id
            ),
        );
    }

    for record in &records {
        if record.transect_id.is_some() {
            report.success();
        } else if record.timestamp.is_none() {
            report.skip(Some(&record.filepath), "no capture timestamp");
        } else {
            report.skip(Some(&record.filepath), "outside every transect");
        }
    }

    report.log_summary();
    (records, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_capture_time(raw).unwrap()
    }

    fn record_at(path: &str, time: Option<&str>) -> ImageRecord {
        let mut record = ImageRecord::new(path);
        record.timestamp = time.map(ts);
        record
    }

    fn range(id: &str, start: &str, end: &str) -> ResolvedBoundary {
        ResolvedBoundary {
            transect_id: id.to_string(),
            start: ts(start),
            end: ts(end),
        }
    }

    #[test]
    fn test_inclusive_ranges_and_na_outside() {
        let records = vec![
            record_at("s/0/a.jpg", Some("2024:06:01 09:59:59")),
            record_at("s/0/b.jpg", Some("2024:06:01 10:00:00")),
            record_at("s/0/c.jpg", Some("2024:06:01 10:05:00")),
            record_at("s/0/d.jpg", Some("2024:06:01 10:10:00")),
            record_at("s/0/e.jpg", Some("2024:06:01 10:10:01")),
            record_at("s/0/f.jpg", None),
        ];
        let boundaries = vec![range("T1", "2024-06-01 10:00:00", "2024-06-01 10:10:00")];

        let (records, report) = assign_transects(records, &boundaries);
        let ids: Vec<Option<&str>> = records.iter().map(|r| r.transect_id.as_deref()).collect();
        assert_eq!(ids, vec![None, Some("T1"), Some("T1"), Some("T1"), None, None]);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.skipped, 3);
    }

    #[test]
    fn test_later_boundary_wins_on_overlap() {
        let records = vec![
            record_at("s/0/a.jpg", Some("2024:06:01 10:00:00")),
            record_at("s/0/b.jpg", Some("2024:06:01 10:05:00")),
            record_at("s/0/c.jpg", Some("2024:06:01 10:09:00")),
        ];
        let boundaries = vec![
            range("first", "2024-06-01 10:00:00", "2024-06-01 10:06:00"),
            range("second", "2024-06-01 10:05:00", "2024-06-01 10:10:00"),
        ];

        let (records, report) = assign_transects(records, &boundaries);
        assert_eq!(records[0].transect_id.as_deref(), Some("first"));
        assert_eq!(records[1].transect_id.as_deref(), Some("second"));
        assert_eq!(records[2].transect_id.as_deref(), Some("second"));
        assert_eq!(report.warning_count(), 1);

        // Reversing definition order reverses the winner
        let reversed: Vec<ResolvedBoundary> = boundaries.into_iter().rev().collect();
        let (records, _) = assign_transects(records, &reversed);
        assert_eq!(records[1].transect_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_assignment_discards_stale_labels() {
        let mut stale = record_at("s/0/a.jpg", Some("2024:06:01 12:00:00"));
        stale.transect_id = Some("old".to_string());
        let (records, _) = assign_transects(vec![stale], &[range("T1", "2024-06-01 10:00:00", "2024-06-01 10:10:00")]);
        assert!(records[0].transect_id.is_none());
    }

    #[test]
    fn test_parse_boundaries_both_forms() -> Result<()> {
        let csv = "start_img,end_img,transect_id,start_time,end_time\n\
                   C:\\survey\\0\\a.jpg,C:\\survey\\0\\c.jpg,T1,2024:06:01 10:00:00,2024:06:01 10:05:00\n\
                   ,,T2,2024-06-01 11:00:00,2024-06-01 11:30:00\n\
                   NA,NA,,2024-06-01 12:00:00,2024-06-01 12:30:00\n\
                   ,,T4,not a time,2024-06-01 13:30:00\n";
        let mut report = StageReport::new("boundaries");
        let boundaries = parse_boundaries(csv.as_bytes(), &mut report)?;

        assert_eq!(boundaries.len(), 3);
        assert_eq!(boundaries[0].start_ref.image.as_deref(), Some("C:/survey/0/a.jpg"));
        assert_eq!(boundaries[0].end_ref.time, Some(ts("2024-06-01 10:05:00")));
        assert_eq!(boundaries[1].transect_id, "T2");
        assert!(boundaries[1].start_ref.image.is_none());
        assert!(boundaries[2].start_ref.time.is_none());
        assert_eq!(report.skipped, 1);
        assert_eq!(report.warning_count(), 1);
        Ok(())
    }

    #[test]
    fn test_parse_boundaries_time_only_table() -> Result<()> {
        let csv = "transect_id,start_time,end_time\nT1,2024-06-01 10:00:00,2024-06-01 10:05:00\n";
        let mut report = StageReport::new("boundaries");
        let boundaries = parse_boundaries(csv.as_bytes(), &mut report)?;
        assert_eq!(boundaries.len(), 1);
        assert!(boundaries[0].start_ref.image.is_none());
        Ok(())
    }

    #[test]
    fn test_append_boundary_creates_then_extends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("transects.csv");
        let first = TransectBoundary {
            transect_id: "T1".to_string(),
            start_ref: BoundaryRef {
                image: Some("s/0/a.jpg".to_string()),
                time: Some(ts("2024-06-01 10:00:00")),
            },
            end_ref: BoundaryRef {
                image: Some("s/0/c.jpg".to_string()),
                time: Some(ts("2024-06-01 10:05:00")),
            },
        };
        append_boundary(&path, &first)?;

        // Foreign column order and no trailing newline
        let other = dir.path().join("other.csv");
        std::fs::write(&other, "end_time,transect_id,start_img,end_img,start_time\n2024-06-01 09:00:00,T0,NA,NA,2024-06-01 08:00:00")?;
        let second = TransectBoundary {
            transect_id: "T2".to_string(),
            start_ref: BoundaryRef::time(ts("2024-06-01 11:00:00")),
            end_ref: BoundaryRef::time(ts("2024-06-01 11:30:00")),
        };
        append_boundary(&path, &second)?;
        append_boundary(&other, &second)?;

        let (boundaries, _) = load_boundaries(&path)?;
        assert_eq!(boundaries, vec![first, second.clone()]);
        let (boundaries, _) = load_boundaries(&other)?;
        assert_eq!(boundaries.len(), 2);
        assert_eq!(boundaries[1], second);
        Ok(())
    }

    #[test]
    fn test_append_boundary_rejects_incomplete_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("transects.csv");
        std::fs::write(&path, "transect_id,start_time,end_time\n")?;
        let boundary = TransectBoundary {
            transect_id: "T1".to_string(),
            start_ref: BoundaryRef::image("s/0/a.jpg"),
            end_ref: BoundaryRef::image("s/0/b.jpg"),
        };
        let err = append_boundary(&path, &boundary).unwrap_err();
        assert!(err.downcast_ref::<TableError>().is_some());
        Ok(())
    }

    #[test]
    fn test_parse_boundaries_missing_columns() {
        let mut report = StageReport::new("boundaries");
        let err = parse_boundaries("transect_id,start_img\nT1,a.jpg\n".as_bytes(), &mut report).unwrap_err();
        assert!(err.downcast_ref::<TableError>().is_some());

        let err = parse_boundaries("start_time,end_time\na,b\n".as_bytes(), &mut report).unwrap_err();
        assert!(err.to_string().contains("transect_id"));
    }
}
