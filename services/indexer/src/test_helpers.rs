//! Fixture builders shared by the unit tests.
//!
//! Images are synthesized in memory: a bare JPEG with a single APP1/Exif
//! segment carrying whatever TIFF fields the test needs.

use crate::store::{ObjectDescriptor, Tags};
use chrono::{TimeZone, Utc};
use exif::experimental::Writer;
use exif::{Field, In, Rational, Tag, Value};
use std::io::Cursor;

pub fn ascii(tag: Tag, value: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![value.as_bytes().to_vec()]),
    }
}

pub fn short(tag: Tag, value: u16) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Short(vec![value]),
    }
}

fn dms(tag: Tag, (d, m, s): (u32, u32, u32)) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Rational(vec![
            Rational { num: d, denom: 1 },
            Rational { num: m, denom: 1 },
            Rational { num: s, denom: 1 },
        ]),
    }
}

pub fn gps_fields(lat: (u32, u32, u32), lat_ref: &str, lon: (u32, u32, u32), lon_ref: &str) -> Vec<Field> {
    vec![
        dms(Tag::GPSLatitude, lat),
        ascii(Tag::GPSLatitudeRef, lat_ref),
        dms(Tag::GPSLongitude, lon),
        ascii(Tag::GPSLongitudeRef, lon_ref),
    ]
}

/// Wrap the given fields into a minimal JPEG (SOI, APP1 Exif, EOI).
pub fn jpeg_with_fields(fields: &[Field]) -> Vec<u8> {
    let mut writer = Writer::new();
    for field in fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let segment_len = (tiff.len() + 2 + 6) as u16;
    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&segment_len.to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

/// A JPEG carrying camera make and a capture date.
pub fn sample_jpeg() -> Vec<u8> {
    jpeg_with_fields(&[
        ascii(Tag::Make, "Canon"),
        ascii(Tag::DateTimeOriginal, "2024:12:25 10:30:45"),
    ])
}

pub fn descriptor(bucket: &str, key: &str, size: u64) -> ObjectDescriptor {
    ObjectDescriptor {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size,
        last_modified: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
        etag: "\"abc123\"".to_string(),
        content_type: Some("image/jpeg".to_string()),
        tags: Tags::new(),
    }
}
