//! PostgreSQL implementation of the record repository.

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, trace};

use autolabel_core::{
    Annotation, Error, ImageRecord, ListRecordsRequest, RecordKey, RecordRepository, Result,
    StorageKey, UpsertRecordRequest,
};

const RECORD_COLUMNS: &str = "id, file_name, dataset, version, storage_key, public_url, \
     annotations, width, height, is_edited, is_crop, created_at, updated_at";

/// PostgreSQL implementation of RecordRepository.
pub struct PgRecordRepository {
    pool: Pool<Postgres>,
}

impl PgRecordRepository {
    /// Create a new PgRecordRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordRepository for PgRecordRepository {
    async fn upsert(&self, req: UpsertRecordRequest) -> Result<ImageRecord> {
        let start = Instant::now();
        let now = Utc::now();
        let (width, height) = match req.size {
            Some(size) => (Some(size.width() as i32), Some(size.height() as i32)),
            None => (None, None),
        };

        // Single statement: the unique key turns a concurrent second insert
        // into the update branch instead of an error.
        let sql = format!(
            r#"INSERT INTO image_record
                   (file_name, dataset, version, storage_key, public_url, annotations,
                    width, height, is_edited, is_crop, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, $10, $10)
               ON CONFLICT (file_name, dataset, version) DO UPDATE SET
                   storage_key = EXCLUDED.storage_key,
                   public_url = EXCLUDED.public_url,
                   annotations = EXCLUDED.annotations,
                   width = COALESCE(EXCLUDED.width, image_record.width),
                   height = COALESCE(EXCLUDED.height, image_record.height),
                   is_edited = TRUE,
                   updated_at = EXCLUDED.updated_at
               RETURNING {}"#,
            RECORD_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(&req.key.file_name)
            .bind(&req.key.dataset)
            .bind(&req.key.version)
            .bind(req.storage_key.as_str())
            .bind(&req.public_url)
            .bind(Json(&req.annotations))
            .bind(width)
            .bind(height)
            .bind(req.is_crop)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        let record = record_from_row(&row)?;
        debug!(
            subsystem = "db",
            component = "records",
            op = "upsert",
            dataset = %record.dataset,
            version = %record.version,
            file_name = %record.file_name,
            is_edited = record.is_edited,
            annotation_count = record.annotations.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Record upserted"
        );
        Ok(record)
    }

    async fn find(&self, key: &RecordKey) -> Result<Option<ImageRecord>> {
        let sql = format!(
            "SELECT {} FROM image_record WHERE file_name = $1 AND dataset = $2 AND version = $3",
            RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&key.file_name)
            .bind(&key.dataset)
            .bind(&key.version)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    async fn get(&self, key: &RecordKey) -> Result<ImageRecord> {
        self.find(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("record {}", key)))
    }

    async fn list(&self, req: ListRecordsRequest) -> Result<Vec<ImageRecord>> {
        let sql = format!(
            r#"SELECT {} FROM image_record
               WHERE ($1::TEXT IS NULL OR dataset = $1)
                 AND ($2::TEXT IS NULL OR version = $2)
               ORDER BY updated_at DESC, id DESC
               LIMIT $3 OFFSET $4"#,
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(req.dataset.as_deref())
            .bind(req.version.as_deref())
            .bind(req.limit.max(0))
            .bind(req.offset.max(0))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn scan(&self, dataset: &str, version: &str) -> Result<Vec<ImageRecord>> {
        let sql = format!(
            "SELECT {} FROM image_record WHERE dataset = $1 AND version = $2 ORDER BY id ASC",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(dataset)
            .bind(version)
            .fetch_all(&self.pool)
            .await?;

        trace!(
            subsystem = "db",
            component = "records",
            op = "scan",
            dataset,
            version,
            total = rows.len(),
            "Scanned records"
        );
        rows.iter().map(record_from_row).collect()
    }

    async fn list_datasets(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT dataset FROM image_record ORDER BY dataset")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("dataset")).collect())
    }
}

fn dimension(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok()).filter(|v| *v > 0)
}

/// Convert a database row to an ImageRecord.
fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<ImageRecord> {
    let annotations: Json<Vec<Annotation>> = row.try_get("annotations")?;
    Ok(ImageRecord {
        id: row.get("id"),
        file_name: row.get("file_name"),
        dataset: row.get("dataset"),
        version: row.get("version"),
        storage_key: StorageKey::new(row.get::<String, _>("storage_key")),
        public_url: row.get("public_url"),
        annotations: annotations.0,
        width: dimension(row.get("width")),
        height: dimension(row.get("height")),
        is_edited: row.get("is_edited"),
        is_crop: row.get("is_crop"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
