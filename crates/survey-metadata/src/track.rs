//! External GPS track loading
//!
//! The flight log arrives either as a KML export (`gx:Track` with paired
//! `<when>`/`<gx:coord>` elements) or as a CSV converted from one. Both end up
//! as a timestamp-sorted `Vec<TrackPoint>`.

use std::fs;
use std::io::Read;
use std::path::Path;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::TableError;
use crate::report::StageReport;
use crate::timestamp::parse_track_time;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Load a track from a `.kml` or CSV file, sorted by timestamp
pub fn load_track(path: &Path) -> Result<(Vec<TrackPoint>, StageReport)> {
    let mut report = StageReport::new("track");
    let is_kml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("kml"))
        .unwrap_or(false);

    let mut points = if is_kml {
        let xml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read KML track: {}", path.display()))?;
        parse_kml_track(&xml, &mut report)
            .with_context(|| format!("Failed to parse KML track: {}", path.display()))?
    } else {
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open track CSV: {}", path.display()))?;
        parse_csv_track(file, &mut report)
            .with_context(|| format!("Failed to parse track CSV: {}", path.display()))?
    };

    sort_track(&mut points);
    info!("Loaded {} track points from {}", points.len(), path.display());
    report.log_summary();
    Ok((points, report))
}

/// Stable sort so points sharing a timestamp keep their file order
pub fn sort_track(points: &mut [TrackPoint]) {
    points.sort_by_key(|p| p.timestamp);
}

pub fn is_sorted(points: &[TrackPoint]) -> bool {
    points.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp)
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|name| h.trim().eq_ignore_ascii_case(name)))
}

/// Parse a track CSV with `Datetime`, `Latitude`, `Longitude`, `Altitude` columns
pub fn parse_csv_track<R: Read>(reader: R, report: &mut StageReport) -> Result<Vec<TrackPoint>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let time_col = find_column(&headers, &["datetime", "timestamp", "time"]);
    let lat_col = find_column(&headers, &["latitude", "lat"]);
    let lon_col = find_column(&headers, &["longitude", "lon", "lng"]);
    let alt_col = find_column(&headers, &["altitude", "alt"]);

    let (time_col, lat_col, lon_col, alt_col) = match (time_col, lat_col, lon_col, alt_col) {
        (Some(t), Some(la), Some(lo), Some(al)) => (t, la, lo, al),
        _ => {
            let missing: Vec<&str> = [
                ("Datetime", time_col),
                ("Latitude", lat_col),
                ("Longitude", lon_col),
                ("Altitude", alt_col),
            ]
            .iter()
            .filter(|(_, col)| col.is_none())
            .map(|(name, _)| *name)
            .collect();
            return Err(TableError::MissingColumns {
                table: "track".to_string(),
                columns: missing.join(", "),
            }
            .into());
        }
    };

    let mut points = Vec::new();
    for (row_number, row) in csv_reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                report.skip(None, format!("row {}: {}", row_number + 1, e));
                continue;
            }
        };
        let number = |col: usize| row.get(col).and_then(|v| v.parse::<f64>().ok()).filter(|v| v.is_finite());

        let parsed = row.get(time_col).and_then(parse_track_time).and_then(|timestamp| {
            Some(TrackPoint {
                timestamp,
                latitude: number(lat_col)?,
                longitude: number(lon_col)?,
                altitude: number(alt_col)?,
            })
        });

        match parsed {
            Some(point) => {
                report.success();
                points.push(point);
            }
            None => report.skip(None, format!("row {}: unparsable track point", row_number + 1)),
        }
    }
    Ok(points)
}

#[derive(Clone, Copy, PartialEq)]
enum KmlText {
    When,
    Coord,
}

/// Parse `<when>`/`<gx:coord>` pairs from a KML flight log. Pairs are matched
/// in order within each track; coordinates are `lon lat alt`.
pub fn parse_kml_track(xml: &str, report: &mut StageReport) -> Result<Vec<TrackPoint>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut points = Vec::new();
    let mut whens: Vec<String> = Vec::new();
    let mut coords: Vec<String> = Vec::new();
    let mut current: Option<KmlText> = None;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                current = match element.local_name().as_ref() {
                    b"when" => Some(KmlText::When),
                    b"coord" => Some(KmlText::Coord),
                    _ => None,
                };
            }
            Event::Text(text) => {
                if let Some(kind) = current {
                    let value = text.unescape()?.into_owned();
                    match kind {
                        KmlText::When => whens.push(value),
                        KmlText::Coord => coords.push(value),
                    }
                }
            }
            Event::End(element) => {
                current = None;
                if matches!(element.local_name().as_ref(), b"Track" | b"Placemark") {
                    flush_kml_pairs(&mut whens, &mut coords, &mut points, report);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    flush_kml_pairs(&mut whens, &mut coords, &mut points, report);
    Ok(points)
}

fn flush_kml_pairs(
    whens: &mut Vec<String>,
    coords: &mut Vec<String>,
    points: &mut Vec<TrackPoint>,
    report: &mut StageReport,
) {
    if whens.len() != coords.len() {
        report.warn(
            None,
            format!("track has {} timestamps but {} coordinates; extra entries ignored", whens.len(), coords.len()),
        );
    }

    for (when, coord) in whens.drain(..).zip(coords.drain(..)) {
        let parts: Vec<f64> = coord
            .split_whitespace()
            .map(|v| v.parse::<f64>().ok().filter(|n| n.is_finite()))
            .collect::<Option<_>>()
            .unwrap_or_default();
        match (parse_track_time(&when), parts.as_slice()) {
            (Some(timestamp), [longitude, latitude, altitude]) => {
                report.success();
                points.push(TrackPoint {
                    timestamp,
                    latitude: *latitude,
                    longitude: *longitude,
                    altitude: *altitude,
                });
            }
            _ => report.skip(None, format!("unparsable track point '{}' / '{}'", when, coord)),
        }
    }
    whens.clear();
    coords.clear();
}
