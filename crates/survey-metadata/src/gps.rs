//! Degrees/minutes/seconds conversions for EXIF GPS fields

/// An unsigned DMS angle with seconds kept at millisecond precision,
/// matching how the value is stored as EXIF rationals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dms {
    pub degrees: u32,
    pub minutes: u32,
    pub seconds_millis: u32,
}

impl Dms {
    pub fn seconds(&self) -> f64 {
        self.seconds_millis as f64 / 1000.0
    }

    /// Decimal degrees for this angle, before the hemisphere sign is applied
    pub fn to_decimal(&self) -> f64 {
        self.degrees as f64 + self.minutes as f64 / 60.0 + self.seconds() / 3600.0
    }
}

/// True for the southern and western hemisphere references
pub fn is_negative_ref(reference: &str) -> bool {
    matches!(reference.trim().to_ascii_uppercase().as_str(), "S" | "W")
}

/// Convert a DMS triple plus hemisphere reference into signed decimal degrees
pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, reference: &str) -> f64 {
    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    if is_negative_ref(reference) {
        -decimal
    } else {
        decimal
    }
}

/// Convert decimal degrees into an unsigned DMS angle. The sign is dropped;
/// use [`latitude_ref`]/[`longitude_ref`] for the hemisphere.
pub fn decimal_to_dms(decimal: f64) -> Dms {
    let value = decimal.abs();
    let mut degrees = value.floor() as u32;
    let fraction = value - degrees as f64;
    let mut minutes = (fraction * 60.0).floor() as u32;
    let remaining = fraction - minutes as f64 / 60.0;
    let mut seconds_millis = (remaining * 3600.0 * 1000.0).round().max(0.0) as u32;

    // Rounding can push seconds to a full minute
    if seconds_millis >= 60_000 {
        seconds_millis -= 60_000;
        minutes += 1;
    }
    if minutes >= 60 {
        minutes -= 60;
        degrees += 1;
    }

    Dms {
        degrees,
        minutes,
        seconds_millis,
    }
}

pub fn latitude_ref(latitude: f64) -> &'static str {
    if latitude < 0.0 { "S" } else { "N" }
}

pub fn longitude_ref(longitude: f64) -> &'static str {
    if longitude < 0.0 { "W" } else { "E" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // One millisecond of arc-second, in degrees
    const MILLI_ARCSEC: f64 = 1.0 / 3_600_000.0;

    #[test]
    fn test_dms_to_decimal_hemispheres() {
        let north = dms_to_decimal(36.0, 36.0, 36.0, "N");
        assert!((north - 36.61).abs() < 1e-9);
        assert!((dms_to_decimal(36.0, 36.0, 36.0, "S") + 36.61).abs() < 1e-9);
        assert!((dms_to_decimal(121.0, 54.0, 0.0, "W") + 121.9).abs() < 1e-9);
        assert!((dms_to_decimal(121.0, 54.0, 0.0, "e") - 121.9).abs() < 1e-9);
    }

    #[test]
    fn test_decimal_to_dms_components() {
        let dms = decimal_to_dms(-121.9025);
        assert_eq!(dms.degrees, 121);
        assert_eq!(dms.minutes, 54);
        assert_eq!(dms.seconds_millis, 9_000);
    }

    #[test]
    fn test_decimal_to_dms_carries_rounded_seconds() {
        // 59.99996 seconds rounds to a full minute
        let value = 10.0 + 59.0 / 60.0 + 59.99996 / 3600.0;
        let dms = decimal_to_dms(value);
        assert_eq!(dms, Dms { degrees: 11, minutes: 0, seconds_millis: 0 });
    }

    #[test]
    fn test_hemisphere_refs() {
        assert_eq!(latitude_ref(-0.5), "S");
        assert_eq!(latitude_ref(0.0), "N");
        assert_eq!(longitude_ref(-121.9), "W");
        assert_eq!(longitude_ref(3.2), "E");
    }

    proptest! {
        #[test]
        fn dms_round_trip_within_a_millisecond(decimal in -180.0f64..180.0) {
            let dms = decimal_to_dms(decimal);
            let reference = longitude_ref(decimal);
            let back = dms_to_decimal(dms.degrees as f64, dms.minutes as f64, dms.seconds(), reference);
            prop_assert!((back - decimal).abs() <= MILLI_ARCSEC);
        }
    }
}
