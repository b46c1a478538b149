//! Parallel crop runner
//!
//! Names are assigned up front by [`assign_filenames`]; the crop work then
//! fans out over the rayon pool. Workers never touch the record table. Each
//! returns `(record index, outcome)` and the runner merges every outcome
//! once the pool is done, so a cancelled or partially failed run still
//! produces a consistent table.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info};

use survey_metadata::{run_with_deadline, CancelToken, DeadlineError, ImageRecord, StageReport};

use crate::crop::{crop_bounds, render_crop, write_output, CropBounds, CropJob};
use crate::error::{ConfigError, CropError};
use crate::geotag::GpsFix;
use crate::renumber::{assign_filenames, CameraCounters, CropPlan};
use crate::CropConfig;

/// Progress of the current crop run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CropProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub is_finished: bool,
}

impl CropProgress {
    pub fn completion_percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            ((self.completed + self.failed + self.cancelled) as f64 / self.total as f64) * 100.0
        }
    }
}

pub struct ImageCropper {
    config: Arc<CropConfig>,
    cancel: CancelToken,
    progress: Arc<Mutex<CropProgress>>,
    source_root: Option<PathBuf>,
}

impl ImageCropper {
    pub fn new(config: CropConfig) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancelToken::new(),
            progress: Arc::new(Mutex::new(CropProgress::default())),
            source_root: None,
        }
    }

    /// Look up relative filepaths that do not exist as given under `root`.
    /// The records' filepaths are left as they are.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    fn locate_source(&self, filepath: &Path) -> PathBuf {
        match &self.source_root {
            Some(root) if filepath.is_relative() && !filepath.exists() => root.join(filepath),
            _ => filepath.to_path_buf(),
        }
    }

    /// Share an externally owned cancellation flag
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> CropProgress {
        self.progress.lock().clone()
    }

    /// Abort early when the crop cannot fit any selected image.
    ///
    /// Reads only image headers. If no header is readable the check passes
    /// and each record fails on its own later.
    pub fn preflight(&self, plans: &[CropPlan]) -> Result<(), ConfigError> {
        let dimensions: Vec<(u32, u32)> = plans
            .par_iter()
            .filter_map(|plan| image::image_dimensions(&plan.source).ok())
            .collect();

        let crop = self.config.crop_amount_px;
        if dimensions.is_empty() || dimensions.iter().any(|&(w, h)| crop_bounds(w, h, crop).is_ok()) {
            return Ok(());
        }

        let (width, height) = dimensions
            .iter()
            .copied()
            .max_by_key(|&(w, h)| u64::from(w) * u64::from(h))
            .unwrap_or_default();
        Err(ConfigError::CropTooLarge { crop, width, height })
    }

    /// Rename, crop and geotag every selected record into `output_dir`.
    ///
    /// Returns the full record set (unselected, skipped and failed records
    /// included), the final camera counters and the stage report.
    pub fn run(
        &self,
        mut records: Vec<ImageRecord>,
        output_dir: &Path,
    ) -> Result<(Vec<ImageRecord>, CameraCounters, StageReport)> {
        self.config.validate()?;

        let mut report = StageReport::new("crop");
        let (counters, mut plans) =
            assign_filenames(&mut records, output_dir, &self.config, CameraCounters::new(), &mut report);
        for plan in plans.iter_mut() {
            plan.source = self.locate_source(&plan.source);
        }
        info!("Selected {} of {} images for cropping", plans.len(), records.len());

        self.preflight(&plans)?;
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

        *self.progress.lock() = CropProgress {
            total: plans.len(),
            ..CropProgress::default()
        };

        let jobs: Vec<CropJob> = plans
            .into_iter()
            .map(|plan| CropJob {
                index: plan.index,
                fix: GpsFix::from_record(&records[plan.index]),
                source: plan.source,
                destination: plan.destination,
            })
            .collect();

        let outcomes: Vec<(usize, Result<CropBounds, CropError>)> = jobs
            .into_par_iter()
            .map(|job| (job.index, self.process(job)))
            .collect();

        for (index, outcome) in outcomes {
            let record = &mut records[index];
            match outcome {
                Ok(bounds) => {
                    debug!(
                        "Cropped {} to {}x{}",
                        record.filepath.display(),
                        bounds.width,
                        bounds.height
                    );
                    report.success();
                }
                Err(CropError::Cancelled) => {
                    report.skip(Some(&record.filepath), CropError::Cancelled.to_string());
                    record.clear_output();
                }
                Err(e) => {
                    report.fail(Some(&record.filepath), e.to_string());
                    record.clear_output();
                }
            }
        }

        self.progress.lock().is_finished = true;
        report.log_summary();
        Ok((records, counters, report))
    }

    fn process(&self, job: CropJob) -> Result<CropBounds, CropError> {
        if self.cancel.is_cancelled() {
            self.progress.lock().cancelled += 1;
            return Err(CropError::Cancelled);
        }

        // Only an accepted render reaches disk; a timed-out worker just drops its bytes
        let destination = job.destination.clone();
        let config = Arc::clone(&self.config);
        let deadline = config.per_file_deadline();
        let outcome = match run_with_deadline(deadline, move || render_crop(&job, &config)) {
            Ok(outcome) => outcome,
            Err(DeadlineError::TimedOut(limit)) => Err(CropError::TimedOut(limit)),
            Err(other) => Err(CropError::Worker(other.to_string())),
        }
        .and_then(|rendered| write_output(&destination, &rendered.bytes).map(|()| rendered.bounds));

        let mut progress = self.progress.lock();
        match outcome {
            Ok(_) => progress.completed += 1,
            Err(_) => progress.failed += 1,
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crop::encode_jpeg;
    use image::{DynamicImage, GenericImageView, RgbImage};
    use tempfile::{tempdir, TempDir};

    fn write_jpeg(dir: &Path, camera: &str, name: &str) -> ImageRecord {
        let path = dir.join(camera).join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let bytes = encode_jpeg(&DynamicImage::ImageRgb8(RgbImage::new(64, 48)), 90).unwrap();
        fs::write(&path, bytes).unwrap();

        let mut record = ImageRecord::new(path);
        record.transect_id = Some("T1".to_string());
        record.altitude = Some(200.0);
        record
    }

    fn small_crop() -> CropConfig {
        CropConfig {
            crop_amount_px: 8,
            ..CropConfig::default()
        }
    }

    fn fixture() -> (TempDir, Vec<ImageRecord>) {
        let dir = tempdir().unwrap();
        let records = vec![
            write_jpeg(dir.path(), "0", "a.jpg"),
            write_jpeg(dir.path(), "1", "a.jpg"),
            write_jpeg(dir.path(), "0", "b.jpg"),
        ];
        (dir, records)
    }

    #[test]
    fn test_run_crops_selected_records() -> Result<()> {
        let (dir, mut records) = fixture();
        records[2].altitude = Some(400.0);
        let mut missing = ImageRecord::new(dir.path().join("0").join("gone.jpg"));
        missing.transect_id = Some("T1".to_string());
        missing.altitude = Some(200.0);
        records.push(missing);

        let output = dir.path().join("out");
        let cropper = ImageCropper::new(small_crop());
        let (records, counters, report) = cropper.run(records, &output)?;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(records[0].new_filename.as_deref(), Some("0_000_00_001.jpg"));
        assert_eq!(records[1].new_filename.as_deref(), Some("1_000_00_001.jpg"));
        assert!(records[2].new_filename.is_none());
        // Failed records lose their names but the counter was already spent
        assert!(records[3].new_filename.is_none());
        assert_eq!(counters.get("0"), Some(&2));

        let written = image::open(output.join("0_000_00_001.jpg"))?;
        assert_eq!(written.dimensions(), (48, 32));
        assert!(!output.join("0_000_00_002.jpg").exists());

        let progress = cropper.progress();
        assert!(progress.is_finished);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.failed, 1);
        Ok(())
    }

    #[test]
    fn test_one_undersized_image_fails_alone() -> Result<()> {
        let dir = tempdir()?;
        let mut records = vec![write_jpeg(dir.path(), "0", "a.jpg")];
        let small = dir.path().join("0").join("b.jpg");
        let bytes = encode_jpeg(&DynamicImage::ImageRgb8(RgbImage::new(12, 12)), 90)?;
        fs::write(&small, bytes)?;
        let mut record = ImageRecord::new(&small);
        record.transect_id = Some("T1".to_string());
        record.altitude = Some(200.0);
        records.push(record);

        let output = dir.path().join("out");
        let (records, _, report) = ImageCropper::new(small_crop()).run(records, &output)?;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(records[0].new_filename.as_deref(), Some("0_000_00_001.jpg"));
        assert!(records[1].new_filename.is_none());
        assert!(records[1].new_filepath.is_none());
        assert!(!output.join("0_000_00_002.jpg").exists());
        Ok(())
    }

    #[test]
    fn test_relative_filepaths_found_under_source_root() -> Result<()> {
        let dir = tempdir()?;
        write_jpeg(dir.path(), "0", "a.jpg");
        let relative = Path::new("0").join("a.jpg");
        let mut record = ImageRecord::new(&relative);
        record.transect_id = Some("T1".to_string());
        record.altitude = Some(200.0);

        let output = dir.path().join("out");
        let cropper = ImageCropper::new(small_crop()).with_source_root(dir.path());
        let (records, _, report) = cropper.run(vec![record.clone()], &output)?;

        assert_eq!(report.succeeded, 1);
        assert_eq!(records[0].filepath, record.filepath);
        assert!(output.join("0_000_00_001.jpg").is_file());
        Ok(())
    }

    #[test]
    fn test_timed_out_crop_leaves_no_output() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("0").join("big.jpg");
        fs::create_dir_all(source.parent().unwrap())?;
        fs::write(&source, encode_jpeg(&DynamicImage::ImageRgb8(RgbImage::new(1024, 1024)), 90)?)?;
        let destination = dir.path().join("out").join("0_000_00_001.jpg");

        // Zero deadline is rejected by validate(), but process() does not check it
        let cropper = ImageCropper::new(CropConfig {
            per_file_deadline_secs: 0,
            ..small_crop()
        });
        let job = CropJob {
            index: 0,
            source,
            destination: destination.clone(),
            fix: None,
        };
        assert!(matches!(cropper.process(job), Err(CropError::TimedOut(_))));

        // Give the detached worker time to finish its render
        std::thread::sleep(std::time::Duration::from_secs(3));
        assert!(!destination.exists());
        assert_eq!(cropper.progress().failed, 1);
        Ok(())
    }

    #[test]
    fn test_oversized_crop_is_fatal_before_output() {
        let (dir, records) = fixture();
        let output = dir.path().join("out");
        let cropper = ImageCropper::new(CropConfig {
            crop_amount_px: 24,
            ..CropConfig::default()
        });

        let err = cropper.run(records, &output).unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::CropTooLarge { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn test_invalid_altitude_window_is_fatal() {
        let (dir, records) = fixture();
        let cropper = ImageCropper::new(CropConfig {
            min_altitude: 300.0,
            max_altitude: 100.0,
            ..small_crop()
        });
        let err = cropper.run(records, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::AltitudeRange { .. })));
    }

    #[test]
    fn test_cancelled_run_still_merges() -> Result<()> {
        let (dir, records) = fixture();
        let token = CancelToken::new();
        let cropper = ImageCropper::new(small_crop()).with_cancel_token(token.clone());
        token.cancel();

        let (records, _, report) = cropper.run(records, &dir.path().join("out"))?;
        assert_eq!(report.skipped, 3);
        assert_eq!(report.succeeded, 0);
        assert!(records.iter().all(|r| r.new_filename.is_none()));
        assert_eq!(cropper.progress().cancelled, 3);
        Ok(())
    }

    #[test]
    fn test_preflight_passes_when_nothing_readable() {
        let cropper = ImageCropper::new(small_crop());
        let plans = vec![CropPlan {
            index: 0,
            source: "/definitely/not/here.jpg".into(),
            destination: "out/0_000_00_001.jpg".into(),
        }];
        assert!(cropper.preflight(&plans).is_ok());
    }

    #[test]
    fn test_completion_percentage() {
        let progress = CropProgress {
            total: 4,
            completed: 1,
            failed: 1,
            ..CropProgress::default()
        };
        assert_eq!(progress.completion_percentage(), 50.0);
        assert_eq!(CropProgress::default().completion_percentage(), 100.0);
    }
}
