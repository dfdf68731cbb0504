use async_trait::async_trait;
use aws_sdk_s3 as s3;
use axum::body::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use s3::presigning::PresigningConfig;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};

use crate::error::StorageError;

/// Lifetime of a signed grant. Re-requests simply mint a new grant; the TTL
/// only bounds the exposure window of any single URL.
const GRANT_TTL_SECS: u64 = 3600;

/// Timeout for the server-side fetch through a signed URL. A hung upstream
/// fails into the transient class instead of holding the request open.
const UPSTREAM_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// SignedGrant
///
/// A time-boxed permission to retrieve exactly one object from the store.
/// The grant is consumed server-side within the same request; its URL must
/// never appear in any response body, header or redirect target.
#[derive(Debug, Clone)]
pub struct SignedGrant {
    /// The object key the grant is scoped to.
    pub key: String,
    /// The store's native presigned URL. Internal use only.
    pub url: String,
    /// Instant after which the store will refuse the URL.
    pub expires_at: DateTime<Utc>,
}

/// Byte stream handed from the storage layer to the response body.
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// FetchedObject
///
/// The result of consuming a signed grant server-side: upstream metadata
/// plus the body stream to proxy to the caller.
pub struct FetchedObject {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub stream: ObjectStream,
}

// 1. StorageService Contract
/// StorageService
///
/// Defines the abstract contract for all interactions with the object
/// storage layer. This trait allows us to swap the concrete implementation,
/// from the real S3 client (S3StorageClient) in production to the in-memory
/// mock (MockStorageService) in tests, without affecting the calling handlers.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Ensures the configured bucket exists. Used in the `Env::Local` setup
    /// to provision the bucket in MinIO. No-op in production.
    async fn ensure_bucket_exists(&self);

    /// Mints a time-limited signed GET URL scoped to exactly one object key.
    async fn presign_download(&self, key: &str) -> Result<SignedGrant, StorageError>;

    /// Consumes a signed grant server-side and returns the object's bytes as
    /// a stream. The caller proxies these bytes; it never redirects.
    async fn fetch_signed(&self, grant: &SignedGrant) -> Result<FetchedObject, StorageError>;
}

// 2. The Real Implementation (S3/MinIO)
/// S3StorageClient
///
/// The concrete implementation using the AWS SDK for S3. Due to S3
/// compatibility, this client transparently handles both the Dockerized
/// MinIO instance locally and an S3-compatible gateway in production.
///
/// `force_path_style(true)` is required for MinIO and most storage gateways.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
    // Shared outbound HTTP client for consuming signed URLs.
    http: reqwest::Client,
}

impl S3StorageClient {
    /// new
    ///
    /// Constructs the S3 client using credentials and configuration from AppConfig.
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        let client = s3::Client::from_conf(config);

        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            bucket_name: bucket.to_string(),
            http,
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    /// ensure_bucket_exists
    ///
    /// Calls the S3 CreateBucket API. S3 APIs are idempotent, so this only
    /// creates the bucket if it does not already exist.
    async fn ensure_bucket_exists(&self) {
        let _ = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await;
    }

    /// presign_download
    ///
    /// Mints a one-hour signed GET URL for a single object key. The expiry
    /// bounds the exposure window; the system does not attempt to prevent
    /// re-issuance.
    async fn presign_download(&self, key: &str) -> Result<SignedGrant, StorageError> {
        let expires_in = Duration::from_secs(GRANT_TTL_SECS);

        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        let presigned_req = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        Ok(SignedGrant {
            key: key.to_string(),
            url: presigned_req.uri().to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(GRANT_TTL_SECS as i64),
        })
    }

    /// fetch_signed
    ///
    /// Streams the object through the signed URL. The URL stays on the
    /// server side of the proxy boundary.
    async fn fetch_signed(&self, grant: &SignedGrant) -> Result<FetchedObject, StorageError> {
        let resp = self.http.get(&grant.url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StorageError::UpstreamStatus(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let content_length = resp.content_length();

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(StorageError::from));

        Ok(FetchedObject {
            content_type,
            content_length,
            stream: Box::pin(stream),
        })
    }
}

/// sanitize_key
///
/// Removes directory navigation components (`..`, `.`) from a key segment
/// before it is embedded in a mock URL.
fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

// 3. The Mock Implementation (For Unit Tests)
/// MockStorageService
///
/// A mock implementation of `StorageService` used exclusively for unit and
/// integration testing. Serves a canned byte body so the grant-issuing
/// handler can be tested without a network connection to S3.
#[derive(Clone)]
pub struct MockStorageService {
    /// When true, all operations return a simulated failure.
    pub should_fail: bool,
    /// The bytes served for every fetched object.
    pub body: Vec<u8>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self {
            should_fail: false,
            body: b"%PDF-1.4 mock body".to_vec(),
        }
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            body: Vec::new(),
        }
    }

    pub fn with_body(body: Vec<u8>) -> Self {
        Self {
            should_fail: false,
            body,
        }
    }
}

impl Default for MockStorageService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {
        // No-op in mock environment.
    }

    async fn presign_download(&self, key: &str) -> Result<SignedGrant, StorageError> {
        if self.should_fail {
            return Err(StorageError::Presign(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }

        let sanitized_key = sanitize_key(key);

        // Deterministic, local-style URL for mock assertions.
        Ok(SignedGrant {
            key: sanitized_key.clone(),
            url: format!(
                "http://localhost:9000/mock-bucket/{}?signature=fake",
                sanitized_key
            ),
            expires_at: Utc::now() + ChronoDuration::seconds(GRANT_TTL_SECS as i64),
        })
    }

    async fn fetch_signed(&self, _grant: &SignedGrant) -> Result<FetchedObject, StorageError> {
        if self.should_fail {
            return Err(StorageError::UpstreamStatus(500));
        }

        let bytes = Bytes::from(self.body.clone());
        let len = bytes.len() as u64;
        let stream = tokio_stream::once(Ok(bytes));

        Ok(FetchedObject {
            content_type: Some("application/pdf".to_string()),
            content_length: Some(len),
            stream: Box::pin(stream),
        })
    }
}

/// StorageState
///
/// The concrete type used to share the storage service access across the
/// application state.
pub type StorageState = Arc<dyn StorageService>;
