//! Bounded-distance lookup of images by position
//!
//! Used to define a transect from two points on a map: each point is snapped
//! to the closest image that carries a position, as long as that image lies
//! within a distance limit.

use serde::{Deserialize, Serialize};

use crate::error::BoundaryError;
use crate::record::{normalize_path, ImageRecord};
use crate::transect::{BoundaryRef, TransectBoundary};

/// Mean Earth radius in metres
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

pub const DEFAULT_MAX_DISTANCE_M: f64 = 500.0;

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    fn of(record: &ImageRecord) -> Option<Self> {
        Some(Self::new(record.latitude?, record.longitude?))
    }
}

/// Great-circle distance in metres
pub fn haversine_m(from: Coordinate, to: Coordinate) -> f64 {
    let (lat1, lat2) = (from.latitude.to_radians(), to.latitude.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialMatch {
    pub index: usize,
    pub distance_m: f64,
}

/// Closest positioned record to `target`, if it lies within
/// `max_distance_m` (inclusive). Records without a position are ignored;
/// on equal distance the first record wins.
pub fn nearest_record_within(records: &[ImageRecord], target: Coordinate, max_distance_m: f64) -> Option<SpatialMatch> {
    let mut best: Option<SpatialMatch> = None;
    for (index, record) in records.iter().enumerate() {
        let Some(position) = Coordinate::of(record) else { continue };
        let distance_m = haversine_m(target, position);
        if best.map_or(true, |b| distance_m < b.distance_m) {
            best = Some(SpatialMatch { index, distance_m });
        }
    }
    best.filter(|b| b.distance_m <= max_distance_m)
}

/// Build a boundary row from two map points.
///
/// Each point is snapped to its nearest image; the earlier capture becomes
/// the start. Both image reference and capture time are filled in.
pub fn boundary_from_coordinates(
    records: &[ImageRecord],
    transect_id: &str,
    first: Coordinate,
    second: Coordinate,
    max_distance_m: f64,
) -> Result<TransectBoundary, BoundaryError> {
    let snap = |point: Coordinate| {
        nearest_record_within(records, point, max_distance_m)
            .map(|m| &records[m.index])
            .ok_or(BoundaryError::NoImageNear {
                latitude: point.latitude,
                longitude: point.longitude,
                max_distance_m,
            })
    };
    let (mut start, mut end) = (snap(first)?, snap(second)?);

    if let (Some(a), Some(b)) = (start.timestamp, end.timestamp) {
        if a > b {
            std::mem::swap(&mut start, &mut end);
        }
    }

    let reference = |record: &ImageRecord| BoundaryRef {
        image: Some(normalize_path(&record.filepath.to_string_lossy())),
        time: record.timestamp,
    };
    Ok(TransectBoundary {
        transect_id: transect_id.to_string(),
        start_ref: reference(start),
        end_ref: reference(end),
    })
}
