//! Blob stores hold uploaded CSV files so that only a URL, not the file itself,
//! travels in the dispatch payload. Stored files expire on their own.
use crate::config::{BlobStoreConfig, BlobStoreType, ValidationError};
use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use url::Url;
use uuid::Uuid;

/// Stored uploads are removed by the store this long after being written.
pub const BLOB_TTL: Duration = Duration::from_secs(3600);
pub const CSV_CONTENT_TYPE: &str = "text/csv";

#[derive(thiserror::Error, Debug)]
pub enum BlobStoreError {
    #[error("S3 error: {0}")]
    S3(String),

    #[error("TTL out of range: {0:?}")]
    InvalidTtl(Duration),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        ttl: Duration,
    ) -> Result<(), BlobStoreError>;
}

/// `csv-<unix_millis>-<uuid_v4>.csv`. Unique per call, even for identical uploads.
pub fn generate_key() -> String {
    format!("csv-{}-{}.csv", Utc::now().timestamp_millis(), Uuid::new_v4())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub key: String,
    pub url: String,
}

/// A blob store plus the public base URL its objects are served from.
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn BlobStore>,
    public_url: Url,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn BlobStore>, public_url: Url) -> Self {
        ArtifactStore { store, public_url }
    }

    pub fn from_config(config: &BlobStoreConfig) -> Result<Self, ValidationError> {
        let public_url = config
            .public_url
            .clone()
            .ok_or(ValidationError::MissingPublicUrl)?;

        let store: Arc<dyn BlobStore> = match &config.r#type {
            BlobStoreType::S3 {
                endpoint,
                bucket,
                region,
                access_key_id,
                secret_access_key,
            } => Arc::new(S3BlobStore::new(
                endpoint.as_ref(),
                region,
                bucket,
                access_key_id,
                secret_access_key,
            )),
            BlobStoreType::Memory => {
                tracing::warn!("Using the in-memory blob store. Stored files are lost on restart.");
                Arc::new(MemoryBlobStore::new())
            }
        };

        Ok(ArtifactStore::new(store, public_url))
    }

    /// Writes a decoded CSV under a fresh key and returns where it can be fetched.
    pub async fn store_csv(&self, data: Bytes) -> Result<StoredArtifact, BlobStoreError> {
        let key = generate_key();
        let size = data.len();
        self.store.put(&key, data, CSV_CONTENT_TYPE, BLOB_TTL).await?;

        let url = self.url_for(&key);
        tracing::info!(key = %key, size, "Stored upload");
        Ok(StoredArtifact { key, url })
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url.as_str().trim_end_matches('/'), key)
    }
}

/// S3-compatible object storage (Cloudflare R2, AWS S3, MinIO).
///
/// Objects carry an `Expires` timestamp and a `ttl-seconds` metadata entry.
/// Deleting them is left to the bucket's lifecycle rule. A failed write is
/// reported after a single attempt.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(
        endpoint: Option<&Url>,
        region: &str,
        bucket: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Self {
        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "csv-relay-config",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::disabled());

        if let Some(endpoint) = endpoint {
            // R2 and MinIO do not serve virtual-hosted bucket names
            builder = builder
                .endpoint_url(endpoint.as_str())
                .force_path_style(true);
        }

        S3BlobStore {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: bucket.to_owned(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        ttl: Duration,
    ) -> Result<(), BlobStoreError> {
        let expires = SystemTime::now()
            .checked_add(ttl)
            .ok_or(BlobStoreError::InvalidTtl(ttl))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .expires(S3DateTime::from(expires))
            .metadata("ttl-seconds", ttl.as_secs().to_string())
            .send()
            .await
            .map_err(|e| BlobStoreError::S3(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBlob {
    pub data: Bytes,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
}

/// Process-local blob store. Expired entries are invisible to `get` and are
/// dropped on the next `put`.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, MemoryBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<MemoryBlob> {
        let now = Utc::now();
        self.lock()
            .get(key)
            .filter(|blob| blob.expires_at > now)
            .cloned()
    }

    /// Keys of all live entries
    pub fn keys(&self) -> Vec<String> {
        let now = Utc::now();
        self.lock()
            .iter()
            .filter(|(_, blob)| blob.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryBlob>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        ttl: Duration,
    ) -> Result<(), BlobStoreError> {
        let now = Utc::now();
        let ttl_delta = TimeDelta::from_std(ttl).map_err(|_| BlobStoreError::InvalidTtl(ttl))?;
        let expires_at = now
            .checked_add_signed(ttl_delta)
            .ok_or(BlobStoreError::InvalidTtl(ttl))?;

        let mut blobs = self.lock();
        blobs.retain(|_, blob| blob.expires_at > now);
        blobs.insert(
            key.to_owned(),
            MemoryBlob {
                data,
                content_type: content_type.to_owned(),
                expires_at,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::assert_key_format;
    use chrono::NaiveDateTime;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn s3_store(endpoint: &str) -> S3BlobStore {
        S3BlobStore::new(
            Some(&Url::parse(endpoint).unwrap()),
            "auto",
            "uploads",
            "key",
            "secret",
        )
    }

    #[test]
    fn test_generate_key() {
        let first = generate_key();
        let second = generate_key();
        assert_key_format(&first);
        assert_key_format(&second);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_store_csv() {
        let memory = Arc::new(MemoryBlobStore::new());
        let artifacts = ArtifactStore::new(
            memory.clone(),
            Url::parse("https://files.example.com/uploads/").unwrap(),
        );

        let stored = artifacts
            .store_csv(Bytes::from_static(b"a,b\n1,2\n"))
            .await
            .unwrap();

        assert_key_format(&stored.key);
        assert_eq!(
            stored.url,
            format!("https://files.example.com/uploads/{}", stored.key)
        );

        let blob = memory.get(&stored.key).unwrap();
        assert_eq!(blob.data.as_ref(), b"a,b\n1,2\n");
        assert_eq!(blob.content_type, "text/csv");

        let ttl = blob.expires_at - Utc::now();
        assert!(ttl <= TimeDelta::seconds(3600) && ttl > TimeDelta::seconds(3590));
    }

    #[test]
    fn test_url_without_trailing_slash() {
        let artifacts = ArtifactStore::new(
            Arc::new(MemoryBlobStore::new()),
            Url::parse("https://pub-123.r2.dev").unwrap(),
        );
        assert_eq!(
            artifacts.url_for("csv-1-abc.csv"),
            "https://pub-123.r2.dev/csv-1-abc.csv"
        );
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemoryBlobStore::new();
        store
            .put("short", Bytes::from_static(b"x"), CSV_CONTENT_TYPE, Duration::ZERO)
            .await
            .unwrap();
        assert!(store.get("short").is_none());

        store
            .put("long", Bytes::from_static(b"y"), CSV_CONTENT_TYPE, BLOB_TTL)
            .await
            .unwrap();
        // the expired entry was dropped by the second put
        assert_eq!(store.keys(), vec!["long".to_string()]);
        assert_eq!(store.lock().len(), 1);
    }

    #[test]
    fn test_from_config_requires_public_url() {
        let config = BlobStoreConfig {
            r#type: BlobStoreType::Memory,
            public_url: None,
        };
        assert!(matches!(
            ArtifactStore::from_config(&config),
            Err(ValidationError::MissingPublicUrl)
        ));
    }

    #[tokio::test]
    async fn test_s3_put_object() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/uploads/csv-\d+-[0-9a-f-]+\.csv$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let artifacts = ArtifactStore::new(
            Arc::new(s3_store(&server.uri())),
            Url::parse("https://files.example.com").unwrap(),
        );
        let stored = artifacts
            .store_csv(Bytes::from_static(b"a,b\n1,2\n"))
            .await
            .unwrap();
        assert_key_format(&stored.key);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.url.path(), format!("/uploads/{}", stored.key));
        assert_eq!(request.headers["content-type"], "text/csv");
        assert_eq!(request.headers["x-amz-meta-ttl-seconds"], "3600");
        assert_eq!(request.body, b"a,b\n1,2\n");

        let expires = request.headers["expires"].to_str().unwrap();
        let expires = NaiveDateTime::parse_from_str(expires, "%a, %d %b %Y %H:%M:%S GMT")
            .unwrap()
            .and_utc();
        let ttl = expires - Utc::now();
        assert!(ttl <= TimeDelta::seconds(3600) && ttl > TimeDelta::seconds(3590));
    }

    #[tokio::test]
    async fn test_s3_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = s3_store(&server.uri())
            .put(
                "csv-1-abc.csv",
                Bytes::from_static(b"x"),
                CSV_CONTENT_TYPE,
                BLOB_TTL,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BlobStoreError::S3(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
