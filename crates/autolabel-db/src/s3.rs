//! S3-compatible object store (AWS S3, Cloudflare R2, MinIO).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info, trace};

use autolabel_core::{Error, ObjectStore, Result, S3Config, StorageKey};

/// Object store over one S3 bucket.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    public_base: String,
}

impl S3ObjectStore {
    /// Build a client from config.
    ///
    /// Static keys take precedence; without them the default AWS credential
    /// chain applies.
    pub async fn connect(config: &S3Config) -> Result<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => {
                builder = builder.credentials_provider(Credentials::new(
                    access.clone(),
                    secret.clone(),
                    None,
                    None,
                    "autolabel",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(Error::Config(
                    "S3_ACCESS_KEY and S3_SECRET_KEY must be set together".to_string(),
                ))
            }
        }

        info!(
            subsystem = "storage",
            component = "s3",
            op = "connect",
            bucket = %config.bucket,
            endpoint = config.endpoint.as_deref().unwrap_or("aws"),
            region = %config.region,
            force_path_style = config.force_path_style,
            "S3 object store configured"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            public_base: public_base(config),
        })
    }

    /// Page through `list_objects_v2` with a `/` delimiter.
    ///
    /// Returns (child folder names, object keys) directly under `prefix`.
    async fn list_level(&self, prefix: &str) -> Result<(Vec<String>, Vec<String>)> {
        let prefix = folder_prefix(prefix);
        let mut folders = Vec::new();
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| Error::Storage(format!("list {}: {}", prefix, DisplayErrorContext(&e))))?;

            for common in page.common_prefixes() {
                if let Some(name) = common
                    .prefix()
                    .and_then(|p| p.strip_prefix(prefix.as_str()))
                    .map(|p| p.trim_end_matches('/'))
                    .filter(|p| !p.is_empty())
                {
                    folders.push(name.to_string());
                }
            }
            for object in page.contents() {
                if let Some(key) = object.key().filter(|k| !k.ends_with('/')) {
                    keys.push(key.to_string());
                }
            }

            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(next)) => token = Some(next.to_string()),
                _ => break,
            }
        }

        folders.sort();
        keys.sort();
        Ok((folders, keys))
    }
}

/// `a/b` → `a/b/`; empty stays empty (bucket root).
fn folder_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn public_base(config: &S3Config) -> String {
    if let Some(url) = &config.public_url {
        return url.trim_end_matches('/').to_string();
    }
    match &config.endpoint {
        Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
        None => format!(
            "https://{}.s3.{}.amazonaws.com",
            config.bucket, config.region
        ),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_folders(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.list_level(prefix).await?.0)
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<StorageKey>> {
        let keys = self.list_level(prefix).await?.1;
        trace!(
            subsystem = "storage",
            component = "s3",
            op = "list_files",
            prefix,
            total = keys.len(),
            "Listed files"
        );
        Ok(keys.into_iter().map(StorageKey::new).collect())
    }

    async fn read_bytes(&self, key: &StorageKey) -> Result<Vec<u8>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    return Err(Error::NotFound(format!("object {}", key)));
                }
                return Err(Error::Storage(format!(
                    "get {}: {}",
                    key,
                    DisplayErrorContext(&service)
                )));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| Error::Storage(format!("read body of {}: {}", key, e)))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn upload_bytes(&self, key: &StorageKey, bytes: Vec<u8>, mime: &str) -> Result<String> {
        debug!(
            subsystem = "storage",
            component = "s3",
            op = "upload",
            storage_key = %key,
            mime,
            size = bytes.len(),
            "Uploading object"
        );
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(mime)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("put {}: {}", key, DisplayErrorContext(&e))))?;
        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &StorageKey) -> String {
        format!("{}/{}", self.public_base, key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            bucket: "datasets".to_string(),
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            force_path_style: false,
            public_url: None,
        }
    }

    #[test]
    fn test_folder_prefix() {
        assert_eq!(folder_prefix("object_detection"), "object_detection/");
        assert_eq!(folder_prefix("/a/b/"), "a/b/");
        assert_eq!(folder_prefix(""), "");
    }

    #[test]
    fn test_public_base_precedence() {
        let mut cfg = config();
        assert_eq!(
            public_base(&cfg),
            "https://datasets.s3.us-east-1.amazonaws.com"
        );

        cfg.endpoint = Some("http://minio:9000/".to_string());
        assert_eq!(public_base(&cfg), "http://minio:9000/datasets");

        cfg.public_url = Some("https://pub.r2.dev/".to_string());
        assert_eq!(public_base(&cfg), "https://pub.r2.dev");
    }
}
