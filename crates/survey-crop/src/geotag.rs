//! EXIF re-embedding for cropped output
//!
//! The JPEG encoder writes bare image data, so the EXIF block is rebuilt
//! from the source fields (per [`ExifPolicy`]) plus any GPS correction, and
//! spliced in as an APP1 segment.

use std::io::Cursor;
use exif::{Context, Exif, Field, In, Rational, Tag, Value};

use survey_metadata::gps::{latitude_ref, longitude_ref};
use survey_metadata::{decimal_to_dms, Dms, ImageRecord};

use crate::error::CropError;
use crate::ExifPolicy;

const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Corrected position to write into the output's GPS IFD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

impl GpsFix {
    /// Only records whose position came from the external track get a fix
    pub fn from_record(record: &ImageRecord) -> Option<Self> {
        if !record.gps_corrected {
            return None;
        }
        Some(Self {
            latitude: record.latitude?,
            longitude: record.longitude?,
            altitude: record.altitude,
        })
    }
}

fn primary_field(tag: Tag, value: Value) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value,
    }
}

fn ascii(text: &str) -> Value {
    Value::Ascii(vec![text.as_bytes().to_vec()])
}

fn dms_value(dms: Dms) -> Value {
    Value::Rational(vec![
        Rational { num: dms.degrees, denom: 1 },
        Rational { num: dms.minutes, denom: 1 },
        Rational { num: dms.seconds_millis, denom: 1000 },
    ])
}

/// GPS IFD entries for a fix: version 2.3.0.0, DMS with millisecond seconds,
/// altitude in millimetres with a below-sea-level reference.
pub fn gps_fields(fix: &GpsFix) -> Vec<Field> {
    let mut fields = vec![
        primary_field(Tag::GPSVersionID, Value::Byte(vec![2, 3, 0, 0])),
        primary_field(Tag::GPSLatitudeRef, ascii(latitude_ref(fix.latitude))),
        primary_field(Tag::GPSLatitude, dms_value(decimal_to_dms(fix.latitude))),
        primary_field(Tag::GPSLongitudeRef, ascii(longitude_ref(fix.longitude))),
        primary_field(Tag::GPSLongitude, dms_value(decimal_to_dms(fix.longitude))),
    ];

    if let Some(altitude) = fix.altitude {
        let below_sea_level = altitude < 0.0;
        fields.push(primary_field(Tag::GPSAltitudeRef, Value::Byte(vec![u8::from(below_sea_level)])));
        fields.push(primary_field(
            Tag::GPSAltitude,
            Value::Rational(vec![Rational {
                num: (altitude.abs() * 1000.0).round() as u32,
                denom: 1000,
            }]),
        ));
    }
    fields
}

/// Fields for the cropped output's EXIF block
pub fn output_fields(
    source: Option<&Exif>,
    fix: Option<&GpsFix>,
    policy: ExifPolicy,
    width: u32,
    height: u32,
) -> Vec<Field> {
    let mut fields = Vec::new();

    if let (ExifPolicy::Preserve, Some(exif)) = (policy, source) {
        for field in exif.fields() {
            if field.ifd_num != In::PRIMARY || matches!(field.value, Value::Unknown(..)) {
                continue;
            }
            if matches!(field.tag, Tag::PixelXDimension | Tag::PixelYDimension) {
                continue;
            }
            if fix.is_some() && field.tag.context() == Context::Gps {
                continue;
            }
            fields.push(field.clone());
        }
        fields.push(primary_field(Tag::PixelXDimension, Value::Long(vec![width])));
        fields.push(primary_field(Tag::PixelYDimension, Value::Long(vec![height])));
    }

    if let Some(fix) = fix {
        fields.extend(gps_fields(fix));
    }
    fields
}

/// Serialize fields as a big-endian TIFF structure
pub fn encode_tiff(fields: &[Field]) -> Result<Vec<u8>, CropError> {
    let mut writer = exif::experimental::Writer::new();
    for field in fields {
        writer.push_field(field);
    }
    let mut buffer = Cursor::new(Vec::new());
    writer
        .write(&mut buffer, false)
        .map_err(|e| CropError::Exif(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Splice a TIFF block into a JPEG as an APP1 segment, after SOI and any JFIF APP0
pub fn insert_exif_segment(jpeg: &[u8], tiff: &[u8]) -> Result<Vec<u8>, CropError> {
    if jpeg.len() < 4 || jpeg[0..2] != [0xFF, 0xD8] {
        return Err(CropError::Exif("output is not a JPEG stream".to_string()));
    }

    let segment_len = 2 + EXIF_HEADER.len() + tiff.len();
    let segment_len = u16::try_from(segment_len)
        .map_err(|_| CropError::Exif(format!("EXIF block of {} bytes exceeds one APP1 segment", tiff.len())))?;

    let mut insert_at = 2;
    if jpeg[2..4] == [0xFF, 0xE0] && jpeg.len() >= 6 {
        let app0_len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        insert_at = (2 + 2 + app0_len).min(jpeg.len());
    }

    let mut out = Vec::with_capacity(jpeg.len() + segment_len as usize + 2);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(tiff);
    out.extend_from_slice(&jpeg[insert_at..]);
    Ok(out)
}
