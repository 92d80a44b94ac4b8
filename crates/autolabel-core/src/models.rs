//! Domain models: record identity, annotations, and the typed adapter for
//! detection payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bbox::{BBox, ImageSize};
use crate::defaults;

// =============================================================================
// KEYS
// =============================================================================

/// Location of an object in the object store.
///
/// Carried next to the public URL from the moment an object is discovered or
/// uploaded, so nothing downstream has to parse it back out of a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, e.g. `a.jpg` for `object_detection/ds/cat/a.jpg`.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// File name without its extension.
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    /// Lowercased extension, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < name.len() => Some(name[idx + 1..].to_lowercase()),
            _ => None,
        }
    }

    /// Whether the key points at an image the pipeline labels.
    pub fn is_labelable_image(&self) -> bool {
        self.extension()
            .map(|ext| defaults::IMAGE_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StorageKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of an image record: one record per (file name, dataset, version).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub file_name: String,
    pub dataset: String,
    pub version: String,
}

impl RecordKey {
    pub fn new(
        file_name: impl Into<String>,
        dataset: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            dataset: dataset.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dataset, self.version, self.file_name)
    }
}

// =============================================================================
// ANNOTATIONS
// =============================================================================

/// Who produced an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationSource {
    Human,
    #[default]
    Model,
    Unknown,
}

/// One bounding-box annotation, in absolute pixels of the record's image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// 1-based position within the owning record.
    pub id: u32,
    pub label: String,
    pub bbox: BBox,
    pub confidence: f64,
    pub source: AnnotationSource,
    pub suggested: bool,
}

/// A single detection exactly as the model (or a manual save) sent it.
///
/// Every field is optional; defaults are applied when converting to
/// [`Annotation`]. An incoming `id` is not kept: ids are reassigned by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub bbox: Vec<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source: Option<AnnotationSource>,
    #[serde(default)]
    pub suggested: Option<bool>,
}

impl RawDetection {
    /// Convenience constructor used by callers that already hold typed values.
    pub fn new(label: impl Into<String>, bbox: [f64; 4], confidence: f64) -> Self {
        Self {
            label: Some(label.into()),
            bbox: bbox.to_vec(),
            confidence: Some(confidence),
            ..Self::default()
        }
    }
}

/// Response body of the detection service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    #[serde(default)]
    pub annotations: Vec<RawDetection>,
    #[serde(default)]
    pub image_width: Option<u32>,
    #[serde(default)]
    pub image_height: Option<u32>,
}

impl DetectionResponse {
    /// Image size reported by the model, if it reported a usable one.
    pub fn image_size(&self) -> Option<ImageSize> {
        match (self.image_width, self.image_height) {
            (Some(w), Some(h)) => ImageSize::new(w, h).ok(),
            _ => None,
        }
    }
}

/// Convert raw detections into stored annotations.
///
/// Ids are assigned sequentially over the kept detections. Detections whose
/// bbox is not four finite numbers are dropped. When `size` is known every box
/// is normalized against it.
pub fn annotations_from_detections(
    detections: &[RawDetection],
    size: Option<ImageSize>,
) -> Vec<Annotation> {
    detections
        .iter()
        .filter_map(|d| match BBox::from_slice(&d.bbox) {
            Some(bbox) => Some((d, bbox)),
            None => {
                warn!(
                    label = d.label.as_deref().unwrap_or(""),
                    bbox_len = d.bbox.len(),
                    "Skipping detection with malformed bbox"
                );
                None
            }
        })
        .enumerate()
        .map(|(i, (d, bbox))| Annotation {
            id: i as u32 + 1,
            label: d.label.clone().unwrap_or_default(),
            bbox: match size {
                Some(size) => bbox.normalize(size),
                None => bbox,
            },
            confidence: d
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(0.0),
            source: d.source.unwrap_or_default(),
            suggested: d.suggested.unwrap_or(false),
        })
        .collect()
}

// =============================================================================
// RECORDS
// =============================================================================

/// Persisted annotation record for one image in one dataset version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Monotonic id assigned on insert; defines export scan order.
    pub id: i64,
    pub file_name: String,
    pub dataset: String,
    pub version: String,
    pub storage_key: StorageKey,
    pub public_url: String,
    pub annotations: Vec<Annotation>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub is_edited: bool,
    pub is_crop: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.file_name, &self.dataset, &self.version)
    }

    pub fn image_size(&self) -> Option<ImageSize> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => ImageSize::new(w, h).ok(),
            _ => None,
        }
    }

    pub fn status(&self) -> RecordStatus {
        if self.is_edited {
            RecordStatus::Edited
        } else {
            RecordStatus::New
        }
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            file_name: self.file_name.clone(),
            public_url: self.public_url.clone(),
            dataset: self.dataset.clone(),
            version: self.version.clone(),
            status: self.status(),
        }
    }
}

/// Whether a record still holds its first write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    New,
    Edited,
}

/// Listing projection of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub file_name: String,
    pub public_url: String,
    pub dataset: String,
    pub version: String,
    pub status: RecordStatus,
}
