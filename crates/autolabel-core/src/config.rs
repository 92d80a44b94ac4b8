//! Environment-driven configuration.
//!
//! Each config type has `from_env()` for the binary and `from_lookup()` which
//! takes any `Fn(&str) -> Option<String>` so tests never touch the process
//! environment.

use std::path::PathBuf;

use crate::defaults;
use crate::error::{Error, Result};

fn parse_bool(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn non_empty(val: Option<String>) -> Option<String> {
    val.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Layout and concurrency settings for the labeling pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Object-store prefix holding datasets.
    pub dataset_root: String,
    /// Folder-name prefix selecting datasets for `label_all`.
    pub dataset_prefix: String,
    /// Object-store prefix for exports, descriptors and sidecars.
    pub metadata_root: String,
    /// Maximum concurrent infer-and-save tasks per dataset (at least 1).
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset_root: defaults::DATASET_ROOT.to_string(),
            dataset_prefix: defaults::DATASET_PREFIX.to_string(),
            metadata_root: defaults::METADATA_ROOT.to_string(),
            concurrency: defaults::LABEL_CONCURRENCY,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = non_empty(lookup("DATASET_ROOT")) {
            config.dataset_root = val.trim_matches('/').to_string();
        }
        if let Some(val) = lookup("DATASET_PREFIX") {
            config.dataset_prefix = val;
        }
        if let Some(val) = non_empty(lookup("METADATA_ROOT")) {
            config.metadata_root = val.trim_matches('/').to_string();
        }
        if let Some(val) = non_empty(lookup("LABEL_CONCURRENCY")) {
            match val.parse::<usize>() {
                Ok(n) => config.concurrency = n.max(1),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid LABEL_CONCURRENCY, using default")
                }
            }
        }

        config
    }

    pub fn with_dataset_root(mut self, root: impl Into<String>) -> Self {
        self.dataset_root = root.into();
        self
    }

    pub fn with_dataset_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dataset_prefix = prefix.into();
        self
    }

    pub fn with_metadata_root(mut self, root: impl Into<String>) -> Self {
        self.metadata_root = root.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

// =============================================================================
// DETECTION
// =============================================================================

/// Where and how to reach the detection model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl DetectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: defaults::INFERENCE_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = non_empty(lookup("MODEL_API_URL"))
            .ok_or_else(|| Error::Config("MODEL_API_URL is not set".to_string()))?;
        let timeout_secs = non_empty(lookup("INFERENCE_TIMEOUT_SECS"))
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults::INFERENCE_TIMEOUT_SECS);
        Ok(Self { url, timeout_secs })
    }
}

// =============================================================================
// STORAGE
// =============================================================================

/// Settings for an S3-compatible bucket (AWS S3, Cloudflare R2, MinIO).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub force_path_style: bool,
    /// Base URL used to build public object URLs. Falls back to
    /// `{endpoint}/{bucket}` when unset.
    pub public_url: Option<String>,
}

/// Object-store backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Filesystem {
        root: PathBuf,
        /// Base URL prefixed to keys. Falls back to a `file://` URL of the root.
        public_url: Option<String>,
    },
    S3(S3Config),
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = non_empty(lookup("STORAGE_BACKEND"))
            .unwrap_or_else(|| "filesystem".to_string())
            .to_lowercase();

        match backend.as_str() {
            "filesystem" | "fs" | "local" => Ok(StorageConfig::Filesystem {
                root: PathBuf::from(
                    non_empty(lookup("STORAGE_PATH"))
                        .unwrap_or_else(|| defaults::STORAGE_PATH.to_string()),
                ),
                public_url: non_empty(lookup("STORAGE_PUBLIC_URL")),
            }),
            "s3" | "r2" | "minio" => {
                let bucket = non_empty(lookup("S3_BUCKET"))
                    .ok_or_else(|| Error::Config("S3_BUCKET is not set".to_string()))?;
                Ok(StorageConfig::S3(S3Config {
                    bucket,
                    endpoint: non_empty(lookup("S3_ENDPOINT")),
                    region: non_empty(lookup("S3_REGION"))
                        .unwrap_or_else(|| defaults::S3_REGION.to_string()),
                    access_key: non_empty(lookup("S3_ACCESS_KEY")),
                    secret_key: non_empty(lookup("S3_SECRET_KEY")),
                    force_path_style: lookup("S3_FORCE_PATH_STYLE")
                        .map(|v| parse_bool(&v))
                        .unwrap_or(false),
                    public_url: non_empty(lookup("S3_PUBLIC_URL")),
                }))
            }
            other => Err(Error::Config(format!(
                "unknown STORAGE_BACKEND '{}', expected 'filesystem' or 's3'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.dataset_root, "object_detection");
        assert_eq!(config.dataset_prefix, "classes-");
        assert_eq!(config.metadata_root, "metadata");
        assert_eq!(config.concurrency, 15);
    }

    #[test]
    fn test_pipeline_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("DATASET_ROOT", "/datasets/"),
            ("DATASET_PREFIX", "ds-"),
            ("METADATA_ROOT", "meta"),
            ("LABEL_CONCURRENCY", "4"),
        ]));
        assert_eq!(config.dataset_root, "datasets");
        assert_eq!(config.dataset_prefix, "ds-");
        assert_eq!(config.metadata_root, "meta");
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_pipeline_concurrency_floor_and_garbage() {
        let config = PipelineConfig::from_lookup(lookup_from(&[("LABEL_CONCURRENCY", "0")]));
        assert_eq!(config.concurrency, 1);

        let config = PipelineConfig::from_lookup(lookup_from(&[("LABEL_CONCURRENCY", "lots")]));
        assert_eq!(config.concurrency, 15);

        assert_eq!(PipelineConfig::default().with_concurrency(0).concurrency, 1);
    }

    #[test]
    fn test_detection_requires_url() {
        let err = DetectionConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = DetectionConfig::from_lookup(lookup_from(&[("MODEL_API_URL", "  ")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_detection_timeout() {
        let config = DetectionConfig::from_lookup(lookup_from(&[
            ("MODEL_API_URL", "http://model:8000/predict"),
            ("INFERENCE_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.url, "http://model:8000/predict");
        assert_eq!(config.timeout_secs, 5);

        let config = DetectionConfig::from_lookup(lookup_from(&[
            ("MODEL_API_URL", "http://model"),
            ("INFERENCE_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_storage_defaults_to_filesystem() {
        let config = StorageConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(
            config,
            StorageConfig::Filesystem {
                root: PathBuf::from("./data/objects"),
                public_url: None,
            }
        );
    }

    #[test]
    fn test_storage_s3() {
        let config = StorageConfig::from_lookup(lookup_from(&[
            ("STORAGE_BACKEND", "S3"),
            ("S3_BUCKET", "datasets"),
            ("S3_ENDPOINT", "http://minio:9000"),
            ("S3_FORCE_PATH_STYLE", "true"),
            ("S3_ACCESS_KEY", "minio"),
            ("S3_SECRET_KEY", "minio123"),
        ]))
        .unwrap();
        match config {
            StorageConfig::S3(s3) => {
                assert_eq!(s3.bucket, "datasets");
                assert_eq!(s3.endpoint.as_deref(), Some("http://minio:9000"));
                assert_eq!(s3.region, "auto");
                assert!(s3.force_path_style);
                assert_eq!(s3.access_key.as_deref(), Some("minio"));
                assert_eq!(s3.public_url, None);
            }
            other => panic!("expected s3 config, got {:?}", other),
        }
    }

    #[test]
    fn test_storage_s3_requires_bucket() {
        let err = StorageConfig::from_lookup(lookup_from(&[("STORAGE_BACKEND", "s3")])).unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));
    }

    #[test]
    fn test_storage_unknown_backend() {
        let err =
            StorageConfig::from_lookup(lookup_from(&[("STORAGE_BACKEND", "ftp")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
