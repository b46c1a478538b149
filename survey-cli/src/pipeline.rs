//! Stage orchestration
//!
//! Each stage is a pure `(records, config) -> (records, report)` step from
//! the library crates. The pipeline wires them together and persists the
//! record table after every stage, so a failed or cancelled run leaves an
//! auditable table behind and can be resumed from the next stage.

use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use survey_crop::ImageCropper;
use survey_metadata::{
    align_to_track, append_boundary, assign_transects, boundary_from_coordinates, load_boundaries, load_track,
    resolve_boundaries, write_table, CancelToken, Coordinate, ImageRecord, MetadataExtractor, StageReport, TableError,
    TransectBoundary,
};

use crate::config::PipelineConfig;

pub const DEFAULT_TABLE_NAME: &str = "final_metadata.csv";
pub const DEFAULT_OUTPUT_ROOT: &str = "cropped_images_on_tx";
pub const DEFAULT_OUTPUT_LEAF: &str = "Images";

/// Inputs for a full run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub images: PathBuf,
    pub transects: PathBuf,
    pub track: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub table: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(images: impl Into<PathBuf>, transects: impl Into<PathBuf>) -> Self {
        Self {
            images: images.into(),
            transects: transects.into(),
            track: None,
            output: None,
            table: None,
        }
    }

    pub fn table_path(&self) -> PathBuf {
        self.table.clone().unwrap_or_else(|| self.images.join(DEFAULT_TABLE_NAME))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.images.join(DEFAULT_OUTPUT_ROOT).join(DEFAULT_OUTPUT_LEAF))
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub table: PathBuf,
    pub output_dir: PathBuf,
    pub reports: Vec<StageReport>,
    #[serde(skip)]
    pub records: Vec<ImageRecord>,
}

impl RunSummary {
    pub fn with_transect(&self) -> usize {
        self.records.iter().filter(|r| r.transect_id.is_some()).count()
    }

    pub fn gps_corrected(&self) -> usize {
        self.records.iter().filter(|r| r.gps_corrected).count()
    }

    pub fn cropped(&self) -> usize {
        self.records.iter().filter(|r| r.new_filename.is_some()).count()
    }

    pub fn print(&self) {
        println!("\n📈 RUN SUMMARY");
        println!("==============");
        println!("Images:        {}", self.records.len());
        println!("On transect:   {}", self.with_transect());
        println!("GPS corrected: {}", self.gps_corrected());
        println!("Cropped:       {}", self.cropped());
        for report in &self.reports {
            println!(
                "  [{}] {} ok, {} skipped, {} failed, {} warnings",
                report.stage,
                report.succeeded,
                report.skipped,
                report.failed,
                report.warning_count()
            );
        }
        println!("💾 Table:  {}", self.table.display());
        println!("🖼️  Images: {}", self.output_dir.display());
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancelToken,
}

impl Pipeline {
    /// Validate the configuration once, before any stage runs
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate().context("Invalid pipeline configuration")?;
        Ok(Self {
            config,
            cancel: CancelToken::new(),
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn extract(&self, images: &Path, excluded: Option<&Path>) -> Result<(Vec<ImageRecord>, StageReport)> {
        let mut extractor = MetadataExtractor::new(self.config.per_file_deadline());
        if let Some(dir) = excluded {
            extractor = extractor.excluding(dir);
        }
        extractor.extract_folder(images)
    }

    /// Resolve the boundary table against the records and label each record
    pub fn assign(&self, records: Vec<ImageRecord>, transects: &Path) -> Result<(Vec<ImageRecord>, StageReport)> {
        let (boundaries, load_report) = load_boundaries(transects)?;
        if boundaries.is_empty() {
            return Err(TableError::Empty {
                table: transects.display().to_string(),
            }
            .into());
        }

        let (resolved, resolve_report) = resolve_boundaries(&records, &boundaries);
        if resolved.is_empty() {
            warn!("None of the {} transect boundaries resolved", boundaries.len());
        }

        let (records, mut report) = assign_transects(records, &resolved);
        report.merge_diagnostics(&load_report);
        report.merge_diagnostics(&resolve_report);
        Ok((records, report))
    }

    /// Snap two map points to their nearest images and add the resulting
    /// boundary row to the `transects` table
    pub fn add_boundary(
        &self,
        records: &[ImageRecord],
        transects: &Path,
        transect_id: &str,
        start: Coordinate,
        end: Coordinate,
    ) -> Result<TransectBoundary> {
        let boundary =
            boundary_from_coordinates(records, transect_id, start, end, self.config.boundary_max_distance_m)?;
        append_boundary(transects, &boundary)?;
        Ok(boundary)
    }

    pub fn align(&self, records: Vec<ImageRecord>, track: &Path) -> Result<(Vec<ImageRecord>, StageReport)> {
        let (points, track_report) = load_track(track)?;
        if points.is_empty() {
            warn!("Track {} has no usable points; GPS left as extracted", track.display());
        }
        let (records, mut report) = align_to_track(records, &points, &self.config.align_config());
        report.merge_diagnostics(&track_report);
        Ok((records, report))
    }

    /// `images` is where relative table filepaths are looked up; the
    /// filepaths themselves are written back unchanged.
    pub fn crop(
        &self,
        records: Vec<ImageRecord>,
        images: Option<&Path>,
        output: &Path,
    ) -> Result<(Vec<ImageRecord>, StageReport)> {
        let mut cropper = ImageCropper::new(self.config.crop_config()).with_cancel_token(self.cancel.clone());
        if let Some(root) = images {
            cropper = cropper.with_source_root(root);
        }
        let (records, counters, report) = cropper.run(records, output)?;
        for (prefix, count) in &counters {
            info!("Camera {}: {} images named", prefix, count);
        }
        Ok((records, report))
    }

    /// Extract, assign, optionally align, then crop. The table is written
    /// after every stage.
    pub fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let table = options.table_path();
        let output_dir = options.output_dir();
        let mut reports = Vec::new();

        let (records, report) = self.extract(&options.images, Some(&output_dir))?;
        if records.is_empty() {
            bail!("No images found under {}", options.images.display());
        }
        write_table(&table, &records)?;
        reports.push(report);

        let (mut records, report) = self.assign(records, &options.transects)?;
        write_table(&table, &records)?;
        reports.push(report);

        if let Some(track) = &options.track {
            let (aligned, report) = self.align(records, track)?;
            records = aligned;
            write_table(&table, &records)?;
            reports.push(report);
        } else {
            info!("No track given; keeping on-board GPS");
        }

        let (records, report) = self.crop(records, Some(options.images.as_path()), &output_dir)?;
        write_table(&table, &records)?;
        reports.push(report);

        Ok(RunSummary {
            table,
            output_dir,
            reports,
            records,
        })
    }
}
