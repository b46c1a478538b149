//! Metadata stages of the transect survey pipeline
//!
//! This crate turns a folder of raw survey imagery into a table of canonical
//! [`ImageRecord`]s and refines it in place: EXIF extraction, transect
//! assignment from boundary definitions (typed in, or snapped from map
//! points to the nearest image), and GPS correction against an
//! independent flight-log track.
//!
//! Every stage is a plain function from a record set (plus configuration) to
//! an updated record set and a [`StageReport`]; nothing here touches a UI or
//! keeps global state between runs.

pub mod align;
pub mod deadline;
pub mod error;
pub mod extract;
pub mod gps;
pub mod record;
pub mod report;
pub mod spatial;
pub mod table;
pub mod timestamp;
pub mod track;
pub mod transect;

pub use align::{align_to_track, nearest_point, resolve_boundaries, AlignConfig, AlignPolicy, OnNoMatch, TrackMatch};
pub use deadline::{run_with_deadline, CancelToken, DeadlineError};
pub use error::{BoundaryError, ExtractError, TableError};
pub use extract::{discover_images, read_capture_metadata, CaptureMetadata, MetadataExtractor};
pub use gps::{decimal_to_dms, dms_to_decimal, Dms};
pub use record::{normalize_path, ImageRecord, RecordIndex};
pub use report::{Diagnostic, DiagnosticKind, StageReport};
pub use spatial::{
    boundary_from_coordinates, haversine_m, nearest_record_within, Coordinate, SpatialMatch, DEFAULT_MAX_DISTANCE_M,
};
pub use table::{read_table, write_table};
pub use track::{load_track, TrackPoint};
pub use transect::{
    append_boundary, assign_transects, load_boundaries, BoundaryRef, ResolvedBoundary, TransectBoundary, BOUNDARY_COLUMNS,
};
