//! Infer-and-save: one image in, one stored record out.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use autolabel_core::{
    annotations_from_detections, defaults, DetectionBackend, Error, ImageRecord, ImageSize, ObjectStore,
    RawDetection, RecordKey, RecordRepository, Result, StorageKey, UpsertRecordRequest,
};

/// One image to label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTask {
    pub storage_key: StorageKey,
    pub public_url: String,
    pub dataset: String,
    pub version: String,
}

impl LabelTask {
    pub fn record_key(&self) -> Result<RecordKey> {
        let file_name = self.storage_key.file_name();
        if file_name.is_empty() {
            return Err(Error::InvalidInput(format!(
                "storage key has no file name: {}",
                self.storage_key
            )));
        }
        Ok(RecordKey::new(file_name, &self.dataset, &self.version))
    }
}

impl fmt::Display for LabelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.storage_key, self.version)
    }
}

/// Read width and height from an encoded image header.
pub fn read_image_size(bytes: &[u8]) -> Result<ImageSize> {
    let (width, height) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| Error::Image(format!("unreadable image: {}", e)))?
        .into_dimensions()
        .map_err(|e| Error::Image(format!("undecodable image header: {}", e)))?;
    ImageSize::new(width, height)
}

/// Runs detection for images and persists the results.
pub struct Labeler {
    records: Arc<dyn RecordRepository>,
    detector: Arc<dyn DetectionBackend>,
    store: Arc<dyn ObjectStore>,
}

impl Labeler {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        detector: Arc<dyn DetectionBackend>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            records,
            detector,
            store,
        }
    }

    /// Label an image unless a record for it already exists.
    ///
    /// An existing record is returned untouched: no inference call, no write.
    #[instrument(skip(self), fields(subsystem = "pipeline", component = "labeler", op = "infer_and_save"))]
    pub async fn infer_and_save(&self, task: &LabelTask) -> Result<ImageRecord> {
        let key = task.record_key()?;
        if let Some(existing) = self.records.find(&key).await? {
            debug!(file_name = %key.file_name, "Record exists, skipping inference");
            return Ok(existing);
        }
        self.detect_and_store(task, key).await
    }

    /// Label an image even if it already has a record. The stored record
    /// ends up marked edited.
    #[instrument(skip(self), fields(subsystem = "pipeline", component = "labeler", op = "reinfer"))]
    pub async fn reinfer(&self, task: &LabelTask) -> Result<ImageRecord> {
        let key = task.record_key()?;
        self.detect_and_store(task, key).await
    }

    /// Store caller-supplied detections for an image through the same
    /// conversion and upsert path the model output takes.
    pub async fn save_manual(
        &self,
        key: RecordKey,
        storage_key: StorageKey,
        detections: Vec<RawDetection>,
        is_crop: bool,
    ) -> Result<ImageRecord> {
        let known = self
            .records
            .find(&key)
            .await?
            .and_then(|r| r.image_size());
        let size = self.resolve_size(known, &storage_key).await?;

        let annotations = annotations_from_detections(&detections, Some(size));
        let record = self
            .records
            .upsert(UpsertRecordRequest {
                public_url: self.store.public_url(&storage_key),
                key,
                storage_key,
                annotations,
                size: Some(size),
                is_crop,
            })
            .await?;
        debug!(
            subsystem = "pipeline",
            component = "labeler",
            op = "save_manual",
            file_name = %record.file_name,
            annotation_count = record.annotations.len(),
            "Manual annotations saved"
        );
        Ok(record)
    }

    async fn detect_and_store(&self, task: &LabelTask, key: RecordKey) -> Result<ImageRecord> {
        let start = Instant::now();
        let response = self.detector.detect(&task.public_url).await?;

        let size = self
            .resolve_size(response.image_size(), &task.storage_key)
            .await?;

        let annotations = annotations_from_detections(&response.annotations, Some(size));
        let record = self
            .records
            .upsert(UpsertRecordRequest {
                key,
                storage_key: task.storage_key.clone(),
                public_url: task.public_url.clone(),
                annotations,
                size: Some(size),
                is_crop: false,
            })
            .await?;

        debug!(
            file_name = %record.file_name,
            annotation_count = record.annotations.len(),
            is_edited = record.is_edited,
            duration_ms = start.elapsed().as_millis() as u64,
            "Image labeled"
        );
        Ok(record)
    }

    /// Known size, else the stored image header, else the export fallback
    /// square. The result is persisted so stored boxes and the export agree.
    async fn resolve_size(&self, known: Option<ImageSize>, key: &StorageKey) -> Result<ImageSize> {
        if let Some(size) = known {
            return Ok(size);
        }
        if let Some(size) = self.stored_image_size(key).await {
            return Ok(size);
        }
        warn!(
            storage_key = %key,
            fallback = defaults::FALLBACK_IMAGE_SIZE,
            "Image size unknown, normalizing against fallback size"
        );
        ImageSize::new(defaults::FALLBACK_IMAGE_SIZE, defaults::FALLBACK_IMAGE_SIZE)
    }

    /// Size from the stored image header, or `None` when it cannot be read.
    async fn stored_image_size(&self, key: &StorageKey) -> Option<ImageSize> {
        let bytes = match self.store.read_bytes(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(storage_key = %key, error = %e, "Could not read stored image");
                return None;
            }
        };
        match read_image_size(&bytes) {
            Ok(size) => Some(size),
            Err(e) => {
                debug!(storage_key = %key, error = %e, "Could not read image header");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_display_and_key() {
        let task = LabelTask {
            storage_key: StorageKey::new("object_detection/classes-pets/cat/a.jpg"),
            public_url: "http://store/object_detection/classes-pets/cat/a.jpg".to_string(),
            dataset: "classes-pets".to_string(),
            version: "v1".to_string(),
        };
        assert_eq!(
            task.to_string(),
            "object_detection/classes-pets/cat/a.jpg@v1"
        );
        assert_eq!(
            task.record_key().unwrap(),
            RecordKey::new("a.jpg", "classes-pets", "v1")
        );
    }

    #[test]
    fn test_task_without_file_name_is_invalid() {
        let task = LabelTask {
            storage_key: StorageKey::new("object_detection/classes-pets/cat/"),
            public_url: String::new(),
            dataset: "classes-pets".to_string(),
            version: "v1".to_string(),
        };
        assert!(matches!(task.record_key(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_read_png_size() {
        let img = image::RgbImage::new(32, 24);
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let size = read_image_size(&bytes).unwrap();
        assert_eq!((size.width(), size.height()), (32, 24));
    }

    #[test]
    fn test_read_garbage_size_fails() {
        assert!(matches!(
            read_image_size(b"definitely not an image"),
            Err(Error::Image(_))
        ));
    }
}
