//! Publisher – stores exported certificates in an object store.
//!
//! Objects land under `{id}.pdf` with content type `application/pdf`. Writes
//! overwrite, so republishing the same `id` replaces the previous document.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::PublishError;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Canned access policy applied to a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectAcl {
    Private,
    #[default]
    PublicRead,
    PublicReadWrite,
}

impl ObjectAcl {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectAcl::Private => "private",
            ObjectAcl::PublicRead => "public-read",
            ObjectAcl::PublicReadWrite => "public-read-write",
        }
    }
}

impl fmt::Display for ObjectAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectAcl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(ObjectAcl::Private),
            "public-read" => Ok(ObjectAcl::PublicRead),
            "public-read-write" => Ok(ObjectAcl::PublicReadWrite),
            other => Err(format!("unknown acl {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub acl: ObjectAcl,
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub acl: ObjectAcl,
    /// Lowercase hex SHA-256 of the body.
    pub sha256: String,
    pub location: String,
}

impl StoredObject {
    fn describe(request: &PutObjectRequest, location: String) -> Self {
        Self {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            size: request.body.len() as u64,
            content_type: request.content_type.clone(),
            acl: request.acl,
            sha256: sha256_hex(&request.body),
            location,
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, replacing any previous one under the same key.
    async fn put_object(&self, request: PutObjectRequest) -> Result<StoredObject, PublishError>;

    async fn head_object(&self, bucket: &str, key: &str)
        -> Result<Option<StoredObject>, PublishError>;
}

/// Keys are flat file names: no separators, no parent references.
pub fn validate_key(key: &str) -> Result<(), PublishError> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key.contains("..")
        || key.chars().any(char::is_control)
    {
        return Err(PublishError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Storage key for a recipient's certificate.
pub fn object_key(id: &str) -> String {
    format!("{id}.pdf")
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), (StoredObject, Vec<u8>)>>,
    puts: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Option<(StoredObject, Vec<u8>)> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Number of accepted writes, overwrites included.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, request: PutObjectRequest) -> Result<StoredObject, PublishError> {
        validate_key(&request.key)?;
        let location = format!("memory://{}/{}", request.bucket, request.key);
        let stored = StoredObject::describe(&request, location);
        self.objects.write().await.insert(
            (request.bucket, request.key),
            (stored.clone(), request.body),
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<StoredObject>, PublishError> {
        Ok(self.get_object(bucket, key).await.map(|(meta, _)| meta))
    }
}

// ---------------------------------------------------------------------------
// Local filesystem backend
// ---------------------------------------------------------------------------

/// Stores `root/bucket/key` plus a `key.meta.json` sidecar.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }

    fn meta_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(format!("{key}.meta.json"))
    }
}

/// Write to a uniquely named sibling temp file, then rename it over the target.
/// Concurrent writers of one key never share a temp file; the last rename wins.
async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<(), PublishError> {
    tokio::task::spawn_blocking(move || -> Result<(), PublishError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| PublishError::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(&self, request: PutObjectRequest) -> Result<StoredObject, PublishError> {
        validate_key(&request.key)?;
        validate_key(&request.bucket)?;

        let dir = self.root.join(&request.bucket);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.object_path(&request.bucket, &request.key);
        let location = format!("file://{}", path.display());
        let stored = StoredObject::describe(&request, location);

        let meta_path = self.meta_path(&request.bucket, &request.key);
        write_atomic(path.clone(), request.body).await?;
        let meta = serde_json::to_vec_pretty(&stored)?;
        write_atomic(meta_path, meta).await?;

        debug!("wrote {} ({} bytes)", path.display(), stored.size);
        Ok(stored)
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<StoredObject>, PublishError> {
        validate_key(key)?;
        match tokio::fs::read(self.meta_path(bucket, key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    acl: ObjectAcl,
    public_base_url: Option<String>,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            acl: ObjectAcl::default(),
            public_base_url: None,
        }
    }

    pub fn with_acl(mut self, acl: ObjectAcl) -> Self {
        self.acl = acl;
        self
    }

    /// Report locations as `{base}/{key}` instead of the store's own.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn acl(&self) -> ObjectAcl {
        self.acl
    }

    /// Store `bytes` as the certificate for `id`.
    pub async fn publish(&self, id: &str, bytes: Vec<u8>) -> Result<StoredObject, PublishError> {
        let key = object_key(id);
        validate_key(&key)?;
        let mut stored = self
            .store
            .put_object(PutObjectRequest {
                bucket: self.bucket.clone(),
                key,
                body: bytes,
                content_type: PDF_CONTENT_TYPE.to_string(),
                acl: self.acl,
            })
            .await?;

        if let Some(base) = &self.public_base_url {
            stored.location = format!("{}/{}", base.trim_end_matches('/'), stored.key);
        }
        info!(
            "published {}/{} ({} bytes, {})",
            stored.bucket, stored.key, stored.size, stored.acl
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_acl_names() {
        assert_eq!(object_key("123"), "123.pdf");
        assert_eq!(ObjectAcl::default(), ObjectAcl::PublicRead);
        assert_eq!(
            "public-read-write".parse::<ObjectAcl>().unwrap(),
            ObjectAcl::PublicReadWrite
        );
        assert!("world-writable".parse::<ObjectAcl>().is_err());
        assert!(validate_key("../etc.pdf").is_err());
        assert!(validate_key("a/b.pdf").is_err());
        assert!(validate_key("123.pdf").is_ok());
    }

    #[tokio::test]
    async fn memory_publish_overwrites() {
        let store = Arc::new(MemoryObjectStore::new());
        let publisher = Publisher::new(store.clone(), "mw-s3-storage");

        publisher.publish("123", b"%PDF-one".to_vec()).await.unwrap();
        let second = publisher.publish("123", b"%PDF-two".to_vec()).await.unwrap();

        assert_eq!(store.object_count().await, 1);
        assert_eq!(store.put_count(), 2);
        let (meta, body) = store.get_object("mw-s3-storage", "123.pdf").await.unwrap();
        assert_eq!(body, b"%PDF-two");
        assert_eq!(meta, second);
        assert_eq!(meta.content_type, PDF_CONTENT_TYPE);
        assert_eq!(meta.sha256, sha256_hex(b"%PDF-two"));
    }

    #[tokio::test]
    async fn local_store_writes_object_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()));
        let publisher = Publisher::new(store.clone(), "certs")
            .with_acl(ObjectAcl::Private)
            .with_public_base_url("https://cdn.example.com/certs/");

        let stored = publisher.publish("u-7", b"%PDF-data".to_vec()).await.unwrap();
        assert_eq!(stored.location, "https://cdn.example.com/certs/u-7.pdf");
        assert_eq!(
            std::fs::read(dir.path().join("certs").join("u-7.pdf")).unwrap(),
            b"%PDF-data"
        );

        let head = store.head_object("certs", "u-7.pdf").await.unwrap().unwrap();
        assert_eq!(head.acl, ObjectAcl::Private);
        assert_eq!(head.size, 9);
        assert!(store.head_object("certs", "other.pdf").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_local_publishes_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Arc::new(Publisher::new(
            Arc::new(LocalObjectStore::new(dir.path())),
            "certs",
        ));

        let bodies: Vec<Vec<u8>> = (0u8..8).map(|i| vec![i; 200 * 1024]).collect();
        let tasks: Vec<_> = bodies
            .iter()
            .cloned()
            .map(|body| {
                let publisher = Arc::clone(&publisher);
                tokio::spawn(async move { publisher.publish("123", body).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = std::fs::read(dir.path().join("certs").join("123.pdf")).unwrap();
        assert!(bodies.contains(&stored));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("certs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".upload-"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store
            .put_object(PutObjectRequest {
                bucket: "b".into(),
                key: "../escape.pdf".into(),
                body: vec![1],
                content_type: PDF_CONTENT_TYPE.into(),
                acl: ObjectAcl::Private,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::InvalidKey(_)));
    }
}
