use crate::config::{default_thumbnail_markers, BackfillConfig};
use tracing::trace;

/// Extensions recognized as images, lowercase.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "tiff", "tif", "heic", "heif"];

/// Decision on whether an object should be indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDecision {
    /// Index the object
    Process,
    /// Leave the object alone with given reason
    Skip { reason: String },
}

impl CandidateDecision {
    pub fn is_process(&self) -> bool {
        matches!(self, CandidateDecision::Process)
    }
}

/// Decides which object keys are images worth indexing.
///
/// Shared by the incremental and backfill paths so both apply the same
/// extension and thumbnail rules.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    skip_thumbnails: bool,
    thumbnail_markers: Vec<String>,
}

impl CandidateFilter {
    pub fn new(skip_thumbnails: bool, thumbnail_markers: Vec<String>) -> Self {
        Self {
            skip_thumbnails,
            thumbnail_markers: thumbnail_markers
                .into_iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &BackfillConfig) -> Self {
        Self::new(config.skip_thumbnails, config.thumbnail_markers.clone())
    }

    /// Evaluate a single object key
    pub fn evaluate(&self, key: &str) -> CandidateDecision {
        let file_name = key.rsplit('/').next().unwrap_or(key).to_lowercase();

        let extension = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext,
            _ => {
                return CandidateDecision::Skip {
                    reason: "No file extension".to_string(),
                }
            }
        };

        if !IMAGE_EXTENSIONS.contains(&extension) {
            return CandidateDecision::Skip {
                reason: format!("Not an image extension: .{}", extension),
            };
        }

        if self.skip_thumbnails {
            if let Some(marker) = self
                .thumbnail_markers
                .iter()
                .find(|m| file_name.contains(m.as_str()))
            {
                trace!(key = %key, marker = %marker, "Thumbnail-like filename");
                return CandidateDecision::Skip {
                    reason: format!("Thumbnail-like filename (matches {:?})", marker),
                };
            }
        }

        CandidateDecision::Process
    }
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self::new(true, default_thumbnail_markers())
    }
}
