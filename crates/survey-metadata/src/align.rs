//! Time-series alignment
//!
//! Two jobs share this module because both map a reference onto the capture
//! timeline: pinning transect boundaries to concrete times, and replacing
//! on-board GPS with the nearest point of an external flight-log track.

use std::borrow::Cow;
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::record::{ImageRecord, RecordIndex};
use crate::report::StageReport;
use crate::track::{is_sorted, sort_track, TrackPoint};
use crate::transect::{ResolvedBoundary, TransectBoundary};

/// What to do with a record's existing value when no track point is close enough
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnNoMatch {
    #[default]
    Keep,
    Clear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignPolicy {
    /// Applies to latitude and longitude together
    pub position: OnNoMatch,
    pub altitude: OnNoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    pub tolerance_seconds: f64,
    pub policy: AlignPolicy,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            tolerance_seconds: 3.0,
            policy: AlignPolicy::default(),
        }
    }
}

impl AlignConfig {
    /// Tolerance at nanosecond precision, so sub-second gaps are not rounded away
    pub fn tolerance(&self) -> TimeDelta {
        TimeDelta::nanoseconds((self.tolerance_seconds * 1e9).round() as i64)
    }
}

/// Nearest track point to a capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackMatch {
    pub index: usize,
    /// Track point time minus capture time
    pub offset: TimeDelta,
}

impl TrackMatch {
    pub fn distance(&self) -> TimeDelta {
        self.offset.abs()
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset.num_milliseconds()
    }
}

/// Find the track point closest in time to `timestamp`.
///
/// `track` must be sorted by timestamp. When two points are equally close
/// the earlier one wins; among points sharing a timestamp the first in track
/// order wins.
pub fn nearest_point(track: &[TrackPoint], timestamp: NaiveDateTime) -> Option<TrackMatch> {
    let split = track.partition_point(|p| p.timestamp < timestamp);
    let offset = |index: usize| track[index].timestamp - timestamp;

    let before = split.checked_sub(1).map(|mut index| {
        while index > 0 && track[index - 1].timestamp == track[index].timestamp {
            index -= 1;
        }
        TrackMatch { index, offset: offset(index) }
    });
    let after = (split < track.len()).then(|| TrackMatch { index: split, offset: offset(split) });

    match (before, after) {
        (Some(b), Some(a)) if a.distance() < b.distance() => Some(a),
        (Some(b), _) => Some(b),
        (None, a) => a,
    }
}

/// Overwrite GPS from the nearest track point within tolerance.
///
/// Capture timestamps are never modified. Records without a timestamp are
/// left alone; records without a match get the configured [`AlignPolicy`].
pub fn align_to_track(
    mut records: Vec<ImageRecord>,
    track: &[TrackPoint],
    config: &AlignConfig,
) -> (Vec<ImageRecord>, StageReport) {
    let mut report = StageReport::new("align");
    let track: Cow<[TrackPoint]> = if is_sorted(track) {
        Cow::Borrowed(track)
    } else {
        let mut sorted = track.to_vec();
        sort_track(&mut sorted);
        Cow::Owned(sorted)
    };
    let tolerance = config.tolerance();

    for record in records.iter_mut() {
        let Some(timestamp) = record.timestamp else {
            report.skip(Some(&record.filepath), "no capture timestamp");
            continue;
        };

        match nearest_point(&track, timestamp).filter(|m| m.distance() <= tolerance) {
            Some(found) => {
                let point = &track[found.index];
                record.latitude = Some(point.latitude);
                record.longitude = Some(point.longitude);
                record.altitude = Some(point.altitude);
                record.gps_corrected = true;
                record.track_offset_ms = Some(found.offset_ms());
                report.success();
            }
            None => {
                record.gps_corrected = false;
                record.track_offset_ms = None;
                if config.policy.position == OnNoMatch::Clear {
                    record.latitude = None;
                    record.longitude = None;
                }
                if config.policy.altitude == OnNoMatch::Clear {
                    record.altitude = None;
                }
                report.skip(
                    Some(&record.filepath),
                    format!("no track point within {}s", config.tolerance_seconds),
                );
            }
        }
    }

    report.log_summary();
    (records, report)
}

/// Pin each boundary to concrete capture times.
///
/// Image references win when both resolve to timestamped records; otherwise
/// both literal times are used. Anything else is dropped with a warning.
pub fn resolve_boundaries(
    records: &[ImageRecord],
    boundaries: &[TransectBoundary],
) -> (Vec<ResolvedBoundary>, StageReport) {
    let mut report = StageReport::new("resolve");
    let index = RecordIndex::build(records);
    let capture_time = |image: &Option<String>| {
        image
            .as_deref()
            .and_then(|path| index.get(path))
            .and_then(|i| records[i].timestamp)
    };

    let mut resolved = Vec::with_capacity(boundaries.len());
    for boundary in boundaries {
        let by_image = capture_time(&boundary.start_ref.image).zip(capture_time(&boundary.end_ref.image));
        let by_time = boundary.start_ref.time.zip(boundary.end_ref.time);

        let (mut start, mut end) = match (by_image, by_time) {
            (Some(pair), _) => pair,
            (None, Some(pair)) => {
                if boundary.start_ref.image.is_some() || boundary.end_ref.image.is_some() {
                    report.warn(
                        None,
                        format!("transect {}: image references did not resolve; using literal times", boundary.transect_id),
                    );
                }
                pair
            }
            (None, None) => {
                report.warn(None, format!("transect {}: boundary could not be resolved", boundary.transect_id));
                continue;
            }
        };

        if start > end {
            report.warn(None, format!("transect {}: start after end; swapped", boundary.transect_id));
            std::mem::swap(&mut start, &mut end);
        }
        resolved.push(ResolvedBoundary {
            transect_id: boundary.transect_id.clone(),
            start,
            end,
        });
        report.success();
    }

    report.log_summary();
    (resolved, report)
}
