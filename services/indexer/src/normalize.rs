//! Date and coordinate normalization for raw EXIF values.
//!
//! These parsers never fail loudly: anything that cannot be turned into a
//! well-formed value comes back as `None` so the extractor can keep going
//! with the remaining tags.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decimal-degree coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Parse an EXIF capture timestamp (`YYYY:MM:DD HH:MM:SS`) as UTC.
///
/// Only the date segment uses colons as separators; they are rewritten to
/// hyphens before parsing. Trailing NULs and whitespace (common padding in
/// camera firmware) are ignored. A `T` separator is accepted as well.
pub fn parse_exif_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        return None;
    }

    let (date, time) = trimmed.split_once([' ', 'T'])?;
    let normalized = format!("{} {}", date.replace(':', "-"), time.trim());

    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Convert a degrees/minutes/seconds triple to signed decimal degrees.
///
/// A hemisphere reference starting with `S` or `W` flips the sign.
/// Returns `None` unless the result is finite.
pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, reference: Option<&str>) -> Option<f64> {
    let mut value = degrees + minutes / 60.0 + seconds / 3600.0;
    if !value.is_finite() {
        return None;
    }

    if let Some(r) = reference {
        let hemisphere = r.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if hemisphere.starts_with(['S', 's', 'W', 'w']) {
            value = -value;
        }
    }

    Some(value)
}

/// Combine independently parsed latitude and longitude.
///
/// Both halves must be present; a half-populated pair is dropped.
pub fn coordinate_pair(latitude: Option<f64>, longitude: Option<f64>) -> Option<GpsCoordinates> {
    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) if latitude.is_finite() && longitude.is_finite() => {
            Some(GpsCoordinates { latitude, longitude })
        }
        _ => None,
    }
}
