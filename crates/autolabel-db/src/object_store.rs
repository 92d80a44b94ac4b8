//! Filesystem object store.
//!
//! Keys map to paths under a root directory. Writes are atomic (temp file +
//! rename) so readers never observe a half-written export.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use autolabel_core::{Error, ObjectStore, Result, StorageKey};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Object store rooted at a local directory.
pub struct FilesystemObjectStore {
    root: PathBuf,
    public_base: String,
}

impl FilesystemObjectStore {
    /// Create a store under `root`. Public URLs default to `file://{root}`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let public_base = format!("file://{}", root.display());
        Self { root, public_base }
    }

    /// Serve public URLs from `base` instead, e.g. a static file server.
    pub fn with_public_url(mut self, base: impl Into<String>) -> Self {
        self.public_base = base.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate that the root can write, read, and delete files.
    ///
    /// Run once at startup to surface permission problems before a batch.
    pub async fn validate(&self) -> Result<()> {
        let check_path = self.root.join(".health-check");
        fs::create_dir_all(&self.root).await?;
        fs::write(&check_path, b"storage-health-check").await?;
        let read_back = fs::read(&check_path).await?;
        if read_back != b"storage-health-check" {
            return Err(Error::Storage("read-back mismatch".to_string()));
        }
        fs::remove_file(&check_path).await?;
        Ok(())
    }

    /// Resolve a key or prefix under the root, rejecting escapes.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "object key escapes the store: {}",
                        key
                    )))
                }
            }
        }
        Ok(self.root.join(relative))
    }

    /// Sorted directory entries under `prefix`, filtered by kind.
    async fn entries(&self, prefix: &str, want_dirs: bool) -> Result<Vec<String>> {
        let dir = self.resolve(prefix)?;
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_dir() == want_dirs {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn list_folders(&self, prefix: &str) -> Result<Vec<String>> {
        self.entries(prefix, true).await
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<StorageKey>> {
        let names = self.entries(prefix, false).await?;
        trace!(
            subsystem = "storage",
            component = "filesystem",
            op = "list_files",
            prefix,
            total = names.len(),
            "Listed files"
        );
        Ok(names
            .into_iter()
            .map(|name| StorageKey::new(join_key(prefix, &name)))
            .collect())
    }

    async fn read_bytes(&self, key: &StorageKey) -> Result<Vec<u8>> {
        let path = self.resolve(key.as_str())?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload_bytes(&self, key: &StorageKey, bytes: Vec<u8>, mime: &str) -> Result<String> {
        let full_path = self.resolve(key.as_str())?;
        debug!(
            subsystem = "storage",
            component = "filesystem",
            op = "upload",
            storage_key = %key,
            mime,
            size = bytes.len(),
            "Writing object"
        );

        let parent = full_path
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("object key has no parent: {}", key)))?;
        fs::create_dir_all(parent).await.map_err(|e| {
            warn!(parent = %parent.display(), error = %e, "object_store: create_dir_all failed");
            e
        })?;

        // Dot-prefixed temp names are hidden from listings.
        let temp_path = parent.join(format!(
            ".{}.{}.{}.tmp",
            key.file_name(),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            warn!(temp_path = %temp_path.display(), error = %e, "object_store: File::create failed");
            e
        })?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "object_store: rename failed");
            e
        })?;

        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &StorageKey) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_traversal() {
        let store = FilesystemObjectStore::new("/tmp/objects");
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("a/../../b").is_err());
        assert_eq!(
            store.resolve("/a/b.jpg").unwrap(),
            PathBuf::from("/tmp/objects/a/b.jpg")
        );
    }

    #[test]
    fn test_public_url() {
        let store = FilesystemObjectStore::new("/srv/data").with_public_url("http://cdn.local/");
        assert_eq!(
            store.public_url(&StorageKey::new("ds/a.jpg")),
            "http://cdn.local/ds/a.jpg"
        );

        let store = FilesystemObjectStore::new("/srv/data");
        assert_eq!(
            store.public_url(&StorageKey::new("ds/a.jpg")),
            "file:///srv/data/ds/a.jpg"
        );
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("a/b/", "c.jpg"), "a/b/c.jpg");
        assert_eq!(join_key("", "c.jpg"), "c.jpg");
    }
}
