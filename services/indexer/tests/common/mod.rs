//! Shared setup for the integration tests.

#![allow(dead_code)]

use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use exif_indexer::{
    aggregate_key, BackfillDriver, CandidateFilter, FolderAggregate, FolderRepository, Gateway, ImageProcessor,
    IncrementalUpdater, MemoryStore, Tags,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

pub const BUCKET: &str = "photos";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub processor: Arc<ImageProcessor>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        let gateway = Arc::new(Gateway::new(store.clone(), Duration::from_secs(5)));
        let repository = Arc::new(FolderRepository::new(gateway.clone()));
        let processor = Arc::new(ImageProcessor::new(gateway, repository));
        Self { store, processor }
    }

    pub fn driver(&self) -> BackfillDriver {
        BackfillDriver::new(self.processor.clone(), CandidateFilter::default())
    }

    pub fn updater(&self) -> IncrementalUpdater {
        IncrementalUpdater::new(self.processor.clone(), CandidateFilter::default())
    }

    pub fn put_image(&self, key: &str, body: Vec<u8>) {
        self.store.insert(BUCKET, key, body, Tags::new());
    }

    pub fn aggregate(&self, folder: &str) -> Option<FolderAggregate> {
        self.store
            .object(BUCKET, &aggregate_key(folder))
            .map(|(body, _)| serde_json::from_slice(&body).expect("aggregate should parse"))
    }

    pub fn tags(&self, key: &str) -> Tags {
        self.store.object(BUCKET, key).map(|(_, tags)| tags).unwrap_or_default()
    }
}

fn ascii(tag: Tag, value: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![value.as_bytes().to_vec()]),
    }
}

/// Minimal JPEG with an Exif segment naming the camera and capture date.
pub fn jpeg(make: &str, date_time_original: &str) -> Vec<u8> {
    let make = ascii(Tag::Make, make);
    let date = ascii(Tag::DateTimeOriginal, date_time_original);
    let mut writer = Writer::new();
    writer.push_field(&make);
    writer.push_field(&date);
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).expect("exif write");
    let tiff = tiff.into_inner();

    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// A JPEG whose Exif segment sits behind `padding` bytes of an unrelated
/// APP segment, so a short header read misses it.
pub fn jpeg_with_late_exif(padding: usize) -> Vec<u8> {
    let exif = jpeg("Nikon", "2023:06:01 08:00:00");
    let mut out = vec![0xFF, 0xD8];
    let mut remaining = padding;
    while remaining > 0 {
        let chunk = remaining.min(60_000);
        out.extend_from_slice(&[0xFF, 0xE2]);
        out.extend_from_slice(&((chunk + 2) as u16).to_be_bytes());
        out.extend(std::iter::repeat(0u8).take(chunk));
        remaining -= chunk;
    }
    // Drop the SOI of the inner JPEG, keep its APP1 and EOI
    out.extend_from_slice(&exif[2..]);
    out
}
