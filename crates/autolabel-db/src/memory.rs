//! In-memory record repository for tests and dry runs.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use autolabel_core::{
    Error, ImageRecord, ListRecordsRequest, RecordKey, RecordRepository, Result,
    UpsertRecordRequest,
};

#[derive(Default)]
struct State {
    next_id: i64,
    records: HashMap<RecordKey, ImageRecord>,
}

/// Record repository backed by a map behind one mutex.
///
/// The whole find-and-modify of `upsert` runs under that mutex, so it keeps the
/// same single-writer semantics as the SQL upsert.
#[derive(Default)]
pub struct InMemoryRecordRepository {
    state: Mutex<State>,
    upserts: AtomicUsize,
}

impl InMemoryRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `upsert` calls served so far.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("record store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn upsert(&self, req: UpsertRecordRequest) -> Result<ImageRecord> {
        let mut state = self.lock()?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();

        if let Some(existing) = state.records.get_mut(&req.key) {
            existing.storage_key = req.storage_key;
            existing.public_url = req.public_url;
            existing.annotations = req.annotations;
            if let Some(size) = req.size {
                existing.width = Some(size.width());
                existing.height = Some(size.height());
            }
            existing.is_edited = true;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let record = ImageRecord {
            id: state.next_id,
            file_name: req.key.file_name.clone(),
            dataset: req.key.dataset.clone(),
            version: req.key.version.clone(),
            storage_key: req.storage_key,
            public_url: req.public_url,
            annotations: req.annotations,
            width: req.size.map(|s| s.width()),
            height: req.size.map(|s| s.height()),
            is_edited: false,
            is_crop: req.is_crop,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(req.key, record.clone());
        Ok(record)
    }

    async fn find(&self, key: &RecordKey) -> Result<Option<ImageRecord>> {
        Ok(self.lock()?.records.get(key).cloned())
    }

    async fn get(&self, key: &RecordKey) -> Result<ImageRecord> {
        self.find(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("record {}", key)))
    }

    async fn list(&self, req: ListRecordsRequest) -> Result<Vec<ImageRecord>> {
        let state = self.lock()?;
        let mut records: Vec<ImageRecord> = state
            .records
            .values()
            .filter(|r| req.dataset.as_deref().map_or(true, |d| r.dataset == d))
            .filter(|r| req.version.as_deref().map_or(true, |v| r.version == v))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));

        let offset = req.offset.max(0) as usize;
        let limit = req.limit.max(0) as usize;
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn scan(&self, dataset: &str, version: &str) -> Result<Vec<ImageRecord>> {
        let state = self.lock()?;
        let mut records: Vec<ImageRecord> = state
            .records
            .values()
            .filter(|r| r.dataset == dataset && r.version == version)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn list_datasets(&self) -> Result<Vec<String>> {
        let state = self.lock()?;
        let names: BTreeSet<String> = state.records.values().map(|r| r.dataset.clone()).collect();
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use autolabel_core::{Annotation, AnnotationSource, BBox, ImageSize, StorageKey};

    fn request(file: &str, dataset: &str, labels: &[&str]) -> UpsertRecordRequest {
        UpsertRecordRequest {
            key: RecordKey::new(file, dataset, "v1"),
            storage_key: StorageKey::new(format!("object_detection/{}/cat/{}", dataset, file)),
            public_url: format!("http://store/{}/{}", dataset, file),
            annotations: labels
                .iter()
                .enumerate()
                .map(|(i, l)| Annotation {
                    id: i as u32 + 1,
                    label: l.to_string(),
                    bbox: BBox::new(1.0, 1.0, 10.0, 10.0),
                    confidence: 0.5,
                    source: AnnotationSource::Model,
                    suggested: false,
                })
                .collect(),
            size: ImageSize::new(64, 48).ok(),
            is_crop: false,
        }
    }

    #[tokio::test]
    async fn test_first_write_inserts_second_replaces() {
        let repo = InMemoryRecordRepository::new();

        let first = repo.upsert(request("a.jpg", "ds", &["cat"])).await.unwrap();
        assert!(!first.is_edited);
        assert_eq!(first.annotations.len(), 1);

        let mut second_req = request("a.jpg", "ds", &["dog", "dog"]);
        second_req.public_url = "http://store/moved/a.jpg".to_string();
        second_req.is_crop = true;
        second_req.size = None;
        let second = repo.upsert(second_req).await.unwrap();

        assert!(second.is_edited);
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.public_url, "http://store/moved/a.jpg");
        assert_eq!(second.annotations.len(), 2);
        assert_eq!(second.annotations[0].label, "dog");
        // is_crop and known dimensions survive updates
        assert!(!second.is_crop);
        assert_eq!((second.width, second.height), (Some(64), Some(48)));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.upsert_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_leave_one_record() {
        let repo = Arc::new(InMemoryRecordRepository::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let label = format!("l{}", i);
                repo.upsert(request("same.jpg", "ds", &[label.as_str()])).await
            }));
        }
        let mut inserts = 0;
        for h in handles {
            let record = h.await.unwrap().unwrap();
            if !record.is_edited {
                inserts += 1;
            }
        }
        assert_eq!(inserts, 1);
        assert_eq!(repo.len(), 1);
        let stored = repo
            .get(&RecordKey::new("same.jpg", "ds", "v1"))
            .await
            .unwrap();
        assert!(stored.is_edited);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let repo = InMemoryRecordRepository::new();
        let err = repo
            .get(&RecordKey::new("nope.jpg", "ds", "v1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(repo
            .find(&RecordKey::new("nope.jpg", "ds", "v1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_scan_in_insert_order_and_scoped() {
        let repo = InMemoryRecordRepository::new();
        repo.upsert(request("b.jpg", "ds", &[])).await.unwrap();
        repo.upsert(request("a.jpg", "ds", &[])).await.unwrap();
        repo.upsert(request("c.jpg", "other", &[])).await.unwrap();
        // Updating an early record must not move it in scan order.
        repo.upsert(request("b.jpg", "ds", &["x"])).await.unwrap();

        let scanned = repo.scan("ds", "v1").await.unwrap();
        let names: Vec<&str> = scanned.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["b.jpg", "a.jpg"]);
        assert!(repo.scan("ds", "v2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let repo = InMemoryRecordRepository::new();
        for i in 0..5 {
            repo.upsert(request(&format!("{}.jpg", i), "ds", &[]))
                .await
                .unwrap();
        }
        repo.upsert(request("x.jpg", "other", &[])).await.unwrap();

        let all = repo.list(ListRecordsRequest::default()).await.unwrap();
        assert_eq!(all.len(), 6);

        let page = repo
            .list(ListRecordsRequest {
                dataset: Some("ds".into()),
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|r| r.dataset == "ds"));

        assert_eq!(
            repo.list_datasets().await.unwrap(),
            vec!["ds".to_string(), "other".to_string()]
        );
    }
}
