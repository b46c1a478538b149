//! Border cropping of a single image

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use exif::Reader;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageError};

use crate::error::CropError;
use crate::geotag::{encode_tiff, insert_exif_segment, output_fields, GpsFix};
use crate::{CropConfig, ExifPolicy};

/// Region kept after removing `crop` pixels from every edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub fn crop_bounds(width: u32, height: u32, crop: u32) -> Result<CropBounds, CropError> {
    let margin = u64::from(crop) * 2;
    if margin >= u64::from(width) || margin >= u64::from(height) {
        return Err(CropError::BoundsViolation { width, height, crop });
    }
    Ok(CropBounds {
        x: crop,
        y: crop,
        width: width - 2 * crop,
        height: height - 2 * crop,
    })
}

/// One unit of crop work, owned so it can move onto a deadline thread
#[derive(Debug, Clone)]
pub struct CropJob {
    pub index: usize,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub fix: Option<GpsFix>,
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CropError> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(CropError::Encode)?;
    Ok(buffer)
}

/// An encoded crop that has not been written yet
#[derive(Debug, Clone)]
pub struct RenderedCrop {
    pub bounds: CropBounds,
    pub bytes: Vec<u8>,
}

/// Crop, re-encode and geotag one image in memory
pub fn render_crop(job: &CropJob, config: &CropConfig) -> Result<RenderedCrop, CropError> {
    if !job.source.is_file() {
        return Err(CropError::SourceMissing(job.source.clone()));
    }
    let bytes = fs::read(&job.source).map_err(|e| CropError::Decode {
        path: job.source.clone(),
        source: ImageError::IoError(e),
    })?;
    let image = image::load_from_memory(&bytes).map_err(|source| CropError::Decode {
        path: job.source.clone(),
        source,
    })?;

    let bounds = crop_bounds(image.width(), image.height(), config.crop_amount_px)?;
    let cropped = image.crop_imm(bounds.x, bounds.y, bounds.width, bounds.height);
    let jpeg = encode_jpeg(&cropped, config.jpeg_quality)?;

    // Sources without EXIF are fine; the output just carries less
    let source_exif = match config.exif_policy {
        ExifPolicy::Preserve => Reader::new().read_from_container(&mut Cursor::new(&bytes)).ok(),
        ExifPolicy::Drop => None,
    };
    let fields = output_fields(
        source_exif.as_ref(),
        job.fix.as_ref(),
        config.exif_policy,
        bounds.width,
        bounds.height,
    );
    let bytes = if fields.is_empty() {
        jpeg
    } else {
        insert_exif_segment(&jpeg, &encode_tiff(&fields)?)?
    };
    Ok(RenderedCrop { bounds, bytes })
}

pub fn write_output(destination: &Path, bytes: &[u8]) -> Result<(), CropError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|source| CropError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(destination, bytes).map_err(|source| CropError::Write {
        path: destination.to_path_buf(),
        source,
    })
}

/// Crop, re-encode and geotag one image, writing it to `job.destination`
pub fn crop_image(job: &CropJob, config: &CropConfig) -> Result<CropBounds, CropError> {
    let rendered = render_crop(job, config)?;
    write_output(&job.destination, &rendered.bytes)?;
    Ok(rendered.bounds)
}
