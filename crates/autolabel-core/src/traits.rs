//! Core traits for autolabel abstractions.
//!
//! The pipeline only talks to storage, persistence and the model through these
//! interfaces; concrete backends live in `autolabel-db` and
//! `autolabel-inference`.

use async_trait::async_trait;

use crate::bbox::ImageSize;
use crate::defaults;
use crate::error::Result;
use crate::models::*;

// =============================================================================
// RECORD REPOSITORY
// =============================================================================

/// Create-or-replace request for a record.
#[derive(Debug, Clone)]
pub struct UpsertRecordRequest {
    pub key: RecordKey,
    pub storage_key: StorageKey,
    pub public_url: String,
    pub annotations: Vec<Annotation>,
    /// Image size the annotations were normalized against, when known.
    pub size: Option<ImageSize>,
    /// Only applied on insert.
    pub is_crop: bool,
}

/// Request for listing records, newest update first.
#[derive(Debug, Clone)]
pub struct ListRecordsRequest {
    /// Filter by dataset
    pub dataset: Option<String>,
    /// Filter by version
    pub version: Option<String>,
    /// Maximum results
    pub limit: i64,
    /// Pagination offset
    pub offset: i64,
}

impl Default for ListRecordsRequest {
    fn default() -> Self {
        Self {
            dataset: None,
            version: None,
            limit: defaults::PAGE_LIMIT,
            offset: defaults::PAGE_OFFSET,
        }
    }
}

/// Persistence for image annotation records.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Insert the record, or replace annotations/location of the existing one.
    ///
    /// Runs as a single atomic find-and-modify keyed on the record key. The
    /// first write yields `is_edited = false`; every later write yields
    /// `is_edited = true` and keeps `created_at` and `is_crop`.
    async fn upsert(&self, req: UpsertRecordRequest) -> Result<ImageRecord>;

    /// Point lookup.
    async fn find(&self, key: &RecordKey) -> Result<Option<ImageRecord>>;

    /// Point lookup that fails with `NotFound` when absent.
    async fn get(&self, key: &RecordKey) -> Result<ImageRecord>;

    /// List records, most recently updated first.
    async fn list(&self, req: ListRecordsRequest) -> Result<Vec<ImageRecord>>;

    /// Every record of one dataset version in insertion (id) order.
    async fn scan(&self, dataset: &str, version: &str) -> Result<Vec<ImageRecord>>;

    /// Distinct dataset names, sorted.
    async fn list_datasets(&self) -> Result<Vec<String>>;
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// Key-addressed object storage with public URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Immediate child folder names under `prefix`, sorted.
    async fn list_folders(&self, prefix: &str) -> Result<Vec<String>>;

    /// Keys of the objects directly under `prefix`, sorted.
    async fn list_files(&self, prefix: &str) -> Result<Vec<StorageKey>>;

    /// Read an object. `NotFound` when absent.
    async fn read_bytes(&self, key: &StorageKey) -> Result<Vec<u8>>;

    /// Read an object as UTF-8 text. `NotFound` when absent.
    async fn read_text(&self, key: &StorageKey) -> Result<String> {
        let bytes = self.read_bytes(key).await?;
        String::from_utf8(bytes).map_err(|e| {
            crate::Error::Serialization(format!("object {} is not UTF-8: {}", key, e))
        })
    }

    /// Write an object, replacing any previous content. Returns its public URL.
    async fn upload_bytes(&self, key: &StorageKey, bytes: Vec<u8>, mime: &str) -> Result<String>;

    /// Write a text object.
    async fn upload_text(&self, key: &StorageKey, text: &str, mime: &str) -> Result<String> {
        self.upload_bytes(key, text.as_bytes().to_vec(), mime).await
    }

    /// Public URL of a key. Does not check existence.
    fn public_url(&self, key: &StorageKey) -> String;
}

// =============================================================================
// DETECTION BACKEND
// =============================================================================

/// Object-detection model reachable by image URL.
#[async_trait]
pub trait DetectionBackend: Send + Sync {
    /// Run detection on the image at `image_url`.
    ///
    /// Any transport, status or decoding problem surfaces as
    /// [`Error::Upstream`](crate::Error::Upstream).
    async fn detect(&self, image_url: &str) -> Result<DetectionResponse>;

    /// Check if the backend is available and responding.
    async fn health_check(&self) -> Result<bool>;

    /// Endpoint the backend talks to, for logs.
    fn endpoint(&self) -> &str;
}
