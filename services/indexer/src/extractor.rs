//! EXIF extraction from raw image bytes.
//!
//! Pure CPU work: bytes in, [`ExifRecord`] out. Parse failures are logged at
//! debug level and yield an empty record; they are never returned to callers.

use crate::normalize::{coordinate_pair, dms_to_decimal, parse_exif_datetime, GpsCoordinates};
use chrono::{DateTime, Utc};
use exif::{Exif, In, Tag, Value};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// Capture-time tags in precedence order. The first one present wins.
const DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTime, Tag::DateTimeDigitized];

/// Capture metadata extracted from a single image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExifRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_taken: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps_coordinates: Option<GpsCoordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u32>,
    pub has_exif: bool,
}

impl ExifRecord {
    /// Record for an image without usable EXIF data.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a record, deriving `has_exif` from the populated fields.
    pub fn from_parts(
        date_taken: Option<DateTime<Utc>>,
        camera_make: Option<String>,
        camera_model: Option<String>,
        gps_coordinates: Option<GpsCoordinates>,
        orientation: Option<u32>,
    ) -> Self {
        let has_exif = date_taken.is_some()
            || camera_make.is_some()
            || camera_model.is_some()
            || gps_coordinates.is_some()
            || orientation.is_some();

        Self {
            date_taken,
            camera_make,
            camera_model,
            gps_coordinates,
            orientation,
            has_exif,
        }
    }
}

/// Extract capture metadata from an image buffer.
///
/// Accepts anything `kamadak-exif` recognizes as a container (JPEG, TIFF,
/// HEIF, PNG, WebP). The buffer may be a truncated prefix of the file as
/// long as it covers the EXIF segment.
pub fn extract(image_bytes: &[u8]) -> ExifRecord {
    let mut cursor = Cursor::new(image_bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(e) => {
            debug!(error = %e, size = image_bytes.len(), "No readable EXIF data");
            return ExifRecord::empty();
        }
    };

    record_from_exif(&exif)
}

fn record_from_exif(exif: &Exif) -> ExifRecord {
    // The first present tag is authoritative even when it fails to parse.
    let date_taken = DATE_TAGS
        .iter()
        .find_map(|tag| ascii_field(exif, *tag).map(|raw| (*tag, raw)))
        .and_then(|(tag, raw)| {
            let parsed = parse_exif_datetime(&raw);
            if parsed.is_none() {
                debug!(tag = %tag, raw = %raw, "Unparseable EXIF date");
            }
            parsed
        });

    ExifRecord::from_parts(
        date_taken,
        ascii_field(exif, Tag::Make),
        ascii_field(exif, Tag::Model),
        gps_field(exif),
        integer_field(exif, Tag::Orientation),
    )
}

/// First ASCII component of a field, trimmed. Empty strings count as absent.
fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match field.value {
        Value::Ascii(ref parts) => parts
            .iter()
            .map(|part| String::from_utf8_lossy(part))
            .map(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
            .find(|s| !s.is_empty()),
        _ => None,
    }
}

fn integer_field(exif: &Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
}

fn dms_field(exif: &Exif, tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let reference = ascii_field(exif, ref_tag);

    match field.value {
        Value::Rational(ref v) if v.len() >= 3 => dms_to_decimal(
            v[0].to_f64(),
            v[1].to_f64(),
            v[2].to_f64(),
            reference.as_deref(),
        ),
        _ => None,
    }
}

fn gps_field(exif: &Exif) -> Option<GpsCoordinates> {
    coordinate_pair(
        dms_field(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
        dms_field(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ascii, gps_fields, jpeg_with_fields, short};
    use chrono::TimeZone;
    use exif::Field;

    #[test]
    fn test_extract_full_record() {
        let mut fields = vec![
            ascii(Tag::Make, "Canon"),
            ascii(Tag::Model, "EOS R5"),
            short(Tag::Orientation, 6),
            ascii(Tag::DateTimeOriginal, "2024:12:25 10:30:45"),
        ];
        fields.extend(gps_fields((40, 26, 46), "S", (79, 58, 56), "W"));

        let record = extract(&jpeg_with_fields(&fields));

        assert!(record.has_exif);
        assert_eq!(record.camera_make.as_deref(), Some("Canon"));
        assert_eq!(record.camera_model.as_deref(), Some("EOS R5"));
        assert_eq!(record.orientation, Some(6));
        assert_eq!(
            record.date_taken,
            Some(Utc.with_ymd_and_hms(2024, 12, 25, 10, 30, 45).unwrap())
        );
        let gps = record.gps_coordinates.unwrap();
        assert!((gps.latitude + 40.446).abs() < 0.001);
        assert!((gps.longitude + 79.982).abs() < 0.001);
    }

    #[test]
    fn test_date_precedence() {
        let fields = vec![
            ascii(Tag::DateTime, "2020:01:01 00:00:00"),
            ascii(Tag::DateTimeDigitized, "2019:01:01 00:00:00"),
            ascii(Tag::DateTimeOriginal, "2021:01:01 00:00:00"),
        ];
        let record = extract(&jpeg_with_fields(&fields));
        assert_eq!(
            record.date_taken,
            Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
        );

        let fields = vec![
            ascii(Tag::DateTimeDigitized, "2019:01:01 00:00:00"),
            ascii(Tag::DateTime, "2020:01:01 00:00:00"),
        ];
        let record = extract(&jpeg_with_fields(&fields));
        assert_eq!(
            record.date_taken,
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_bad_date_keeps_other_fields() {
        let fields = vec![
            ascii(Tag::DateTimeOriginal, "garbage"),
            ascii(Tag::Make, "Nikon"),
        ];
        let record = extract(&jpeg_with_fields(&fields));
        assert!(record.has_exif);
        assert!(record.date_taken.is_none());
        assert_eq!(record.camera_make.as_deref(), Some("Nikon"));

        // A lower-precedence tag does not stand in for a broken original.
        let fields = vec![
            ascii(Tag::DateTimeOriginal, "garbage"),
            ascii(Tag::DateTime, "2020:01:01 00:00:00"),
        ];
        let record = extract(&jpeg_with_fields(&fields));
        assert!(record.date_taken.is_none());
    }

    #[test]
    fn test_half_gps_pair_dropped() {
        let mut fields: Vec<Field> = gps_fields((1, 0, 0), "N", (2, 0, 0), "E");
        fields.retain(|f| f.tag != Tag::GPSLongitude);
        fields.push(ascii(Tag::Make, "Sony"));

        let record = extract(&jpeg_with_fields(&fields));
        assert!(record.gps_coordinates.is_none());
        assert!(record.has_exif);
    }

    #[test]
    fn test_no_exif() {
        let record = extract(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(record, ExifRecord::empty());
        assert!(!record.has_exif);

        let record = extract(b"definitely not an image");
        assert!(!record.has_exif);
        assert!(record.camera_make.is_none());
    }

    #[test]
    fn test_has_exif_invariant() {
        assert!(!ExifRecord::from_parts(None, None, None, None, None).has_exif);
        assert!(ExifRecord::from_parts(None, None, None, None, Some(1)).has_exif);
    }

    #[test]
    fn test_record_json_shape() {
        let record = ExifRecord::from_parts(
            Some(Utc.with_ymd_and_hms(2024, 12, 25, 10, 30, 45).unwrap()),
            Some("Apple".to_string()),
            None,
            None,
            Some(1),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["cameraMake"], "Apple");
        assert_eq!(json["hasExif"], true);
        assert_eq!(json["dateTaken"], "2024-12-25T10:30:45Z");
        assert!(json.get("cameraModel").is_none());
    }
}
