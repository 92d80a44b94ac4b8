//! YOLO-style dataset descriptor (`dataset.yaml`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use autolabel_core::{defaults, ObjectStore, Result, StorageKey};

/// Training descriptor for one dataset version. `nc == names.len()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    #[serde(default)]
    pub train: String,
    #[serde(default)]
    pub val: String,
    #[serde(default)]
    pub nc: usize,
    #[serde(default)]
    pub names: Vec<String>,
}

impl DatasetDescriptor {
    /// Descriptor for `classes`, keeping non-empty split paths from `previous`.
    pub fn merged(dataset: &str, previous: Option<&DatasetDescriptor>, classes: &[String]) -> Self {
        let keep = |value: Option<&String>, fallback: String| match value {
            Some(v) if !v.trim().is_empty() => v.clone(),
            _ => fallback,
        };
        Self {
            train: keep(
                previous.map(|p| &p.train),
                format!("./images/{}/train", dataset),
            ),
            val: keep(previous.map(|p| &p.val), format!("./images/{}/val", dataset)),
            nc: classes.len(),
            names: classes.to_vec(),
        }
    }
}

/// Location of a written descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptorRef {
    pub key: StorageKey,
    pub url: String,
}

/// Writes descriptors next to the export.
pub struct DescriptorGenerator {
    store: Arc<dyn ObjectStore>,
    metadata_root: String,
}

impl DescriptorGenerator {
    pub fn new(store: Arc<dyn ObjectStore>, metadata_root: impl Into<String>) -> Self {
        Self {
            store,
            metadata_root: metadata_root.into(),
        }
    }

    pub fn descriptor_key(&self, dataset: &str, version: &str) -> StorageKey {
        StorageKey::new(format!(
            "{}/{}/{}/{}",
            self.metadata_root,
            dataset,
            version,
            defaults::DESCRIPTOR_FILE
        ))
    }

    /// Current descriptor. Missing or unparsable files read as `None`.
    pub async fn read(&self, dataset: &str, version: &str) -> Option<DatasetDescriptor> {
        let key = self.descriptor_key(dataset, version);
        let text = self.store.read_text(&key).await.ok()?;
        match serde_yaml::from_str::<Option<DatasetDescriptor>>(&text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(storage_key = %key, error = %e, "Descriptor unparsable, regenerating");
                None
            }
        }
    }

    /// Write the descriptor for `classes`.
    ///
    /// Existing train/val paths survive; `nc` and `names` are always replaced.
    /// An empty class list writes nothing and returns `None`.
    pub async fn generate(
        &self,
        dataset: &str,
        version: &str,
        classes: &[String],
    ) -> Result<Option<DescriptorRef>> {
        if classes.is_empty() {
            warn!(
                subsystem = "pipeline",
                component = "descriptor",
                dataset,
                version,
                "No classes found, descriptor not written"
            );
            return Ok(None);
        }

        let previous = self.read(dataset, version).await;
        let descriptor = DatasetDescriptor::merged(dataset, previous.as_ref(), classes);
        let body = serde_yaml::to_string(&descriptor)?;

        let key = self.descriptor_key(dataset, version);
        let url = self
            .store
            .upload_text(&key, &body, defaults::MIME_TEXT)
            .await?;

        info!(
            subsystem = "pipeline",
            component = "descriptor",
            dataset,
            version,
            nc = descriptor.nc,
            "Descriptor written"
        );
        Ok(Some(DescriptorRef { key, url }))
    }
}
