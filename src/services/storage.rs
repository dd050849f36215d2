use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Blob storage for uploaded originals and generated images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Public URL under which `key` is served.
    fn public_url(&self, key: &str) -> String;

    /// Inverse of [`ObjectStore::public_url`]: the key for a locator that points
    /// into this store, or `None` for foreign URLs.
    fn key_for(&self, locator: &str) -> Option<String>;
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    public_base_url: String,
    timeout: Duration,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

fn check_status(key: &str, code: u16) -> Result<(), StorageError> {
    match code {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        _ => Err(StorageError::Status { key: key.to_string(), code }),
    }
}

#[async_trait]
impl ObjectStore for R2Client {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = tokio::time::timeout(
            self.timeout,
            self.bucket.put_object_with_content_type(key, data, content_type),
        )
        .await
        .map_err(|_| StorageError::Timeout(key.to_string()))??;

        check_status(key, response.status_code())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = tokio::time::timeout(self.timeout, self.bucket.get_object(key))
            .await
            .map_err(|_| StorageError::Timeout(key.to_string()))??;

        check_status(key, response.status_code())?;
        Ok(response.to_vec())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    fn key_for(&self, locator: &str) -> Option<String> {
        key_under(&self.public_base_url, locator)
    }
}

/// Object store kept in process memory.
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
    fail_uploads: AtomicBool,
}

const MEMORY_BASE_URL: &str = "memory://objects";

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
        }
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|(_, ct)| ct.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Status { key: key.to_string(), code: 503 });
        }
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", MEMORY_BASE_URL, key)
    }

    fn key_for(&self, locator: &str) -> Option<String> {
        key_under(MEMORY_BASE_URL, locator)
    }
}

/// Bare keys map to themselves; URLs map only when they sit under `base_url`.
fn key_under(base_url: &str, locator: &str) -> Option<String> {
    if let Some(rest) = locator.strip_prefix(base_url) {
        let key = rest.trim_start_matches('/');
        return (!key.is_empty()).then(|| key.to_string());
    }
    if locator.contains("://") {
        return None;
    }
    let key = locator.trim_start_matches('/');
    (!key.is_empty()).then(|| key.to_string())
}

/// Store image bytes as `{stem}.{ext}`, with the extension and content type
/// taken from the detected format. Returns the object key.
pub async fn store_image(
    store: &dyn ObjectStore,
    stem: &str,
    bytes: &[u8],
) -> Result<String, StorageError> {
    let (ext, content_type) = match image::guess_format(bytes) {
        Ok(format) => (
            format.extensions_str().first().copied().unwrap_or("img"),
            format.to_mime_type(),
        ),
        Err(_) => ("bin", "application/octet-stream"),
    };

    let key = format!("{}.{}", stem, ext);
    store.upload(&key, bytes, content_type).await?;
    Ok(key)
}

/// Load image bytes from a locator, reading through `store` when the locator
/// belongs to it and over HTTP otherwise. External reads stop at `max_bytes`.
pub async fn fetch_image(
    store: &dyn ObjectStore,
    http: &reqwest::Client,
    locator: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, StorageError> {
    if let Some(key) = store.key_for(locator) {
        return store.download(&key).await;
    }

    let too_large = || StorageError::TooLarge {
        locator: locator.to_string(),
        limit: max_bytes,
    };

    let mut response = http.get(locator).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(StorageError::Status {
            key: locator.to_string(),
            code: status.as_u16(),
        });
    }
    if response.content_length().is_some_and(|len| len > max_bytes as u64) {
        return Err(too_large());
    }

    // Content-Length may be absent or wrong, so the body is bounded as it streams.
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object request for {key} returned status {code}")]
    Status { key: String, code: u16 },

    #[error("Image at {locator} exceeds {limit} bytes")]
    TooLarge { locator: String, limit: usize },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object request for {0} timed out")]
    Timeout(String),

    #[error("Image fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_under() {
        let base = "https://cdn.example.com";
        assert_eq!(
            key_under(base, "https://cdn.example.com/images/1/cat.png").as_deref(),
            Some("images/1/cat.png")
        );
        assert_eq!(key_under(base, "images/1/cat.png").as_deref(), Some("images/1/cat.png"));
        assert_eq!(key_under(base, "/images/cat.png").as_deref(), Some("images/cat.png"));
        assert_eq!(key_under(base, "https://elsewhere.org/cat.png"), None);
        assert_eq!(key_under(base, ""), None);
    }

    #[tokio::test]
    async fn test_memory_store_round_trip_through_url() {
        let store = MemoryObjectStore::new();
        store.upload("generated/1.png", b"png", "image/png").await.unwrap();

        let url = store.public_url("generated/1.png");
        let bytes = fetch_image(&store, &reqwest::Client::new(), &url, 1024)
            .await
            .unwrap();
        assert_eq!(bytes, b"png");
        assert_eq!(store.content_type("generated/1.png").await.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_memory_store_missing_key() {
        let store = MemoryObjectStore::new();
        assert!(matches!(
            store.download("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    /// Serve `len` bytes at `/big.png` on a local port and return its URL.
    async fn serve_bytes(len: usize) -> String {
        let app = axum::Router::new().route(
            "/big.png",
            axum::routing::get(move || async move { vec![0u8; len] }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/big.png", addr)
    }

    #[tokio::test]
    async fn test_external_fetch_is_capped() {
        let store = MemoryObjectStore::new();
        let http = reqwest::Client::new();
        let url = serve_bytes(4096).await;

        let err = fetch_image(&store, &http, &url, 1024).await.unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { limit: 1024, .. }));

        let bytes = fetch_image(&store, &http, &url, 8192).await.unwrap();
        assert_eq!(bytes.len(), 4096);
    }
}
