use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::{AppConfig, StorageBackend};
use crate::services::encryption::{EncryptionError, ImageCipher};

/// Raw object storage for image bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// S3-compatible bucket (AWS S3, Cloudflare R2, MinIO).
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        path_style: bool,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self { bucket })
    }
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        other => Err(StorageError::Status(other)),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;
        check_status(key, response.status_code())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await?;
        check_status(key, response.status_code())?;
        Ok(response.bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(key).await?;
        match check_status(key, response.status_code()) {
            Err(StorageError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}

/// Directory on the local filesystem.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a key to a path under the root, refusing anything that could escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the configured object store.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config.storage_backend {
        StorageBackend::Local => Ok(Arc::new(LocalStore::new(&config.media_root))),
        StorageBackend::S3 => {
            let missing = |name: &str| StorageError::Config(format!("{name} is required for S3 storage"));
            let store = S3Store::new(
                config.s3_bucket.as_deref().ok_or_else(|| missing("S3_BUCKET"))?,
                config.s3_endpoint.as_deref().ok_or_else(|| missing("S3_ENDPOINT"))?,
                &config.s3_region,
                config.s3_access_key.as_deref().ok_or_else(|| missing("S3_ACCESS_KEY"))?,
                config.s3_secret_key.as_deref().ok_or_else(|| missing("S3_SECRET_KEY"))?,
                config.s3_path_style,
            )?;
            Ok(Arc::new(store))
        }
    }
}

/// Encrypting image store shared by the API and the worker.
pub struct ImageStore {
    objects: Arc<dyn ObjectStore>,
    cipher: ImageCipher,
}

impl ImageStore {
    pub fn new(objects: Arc<dyn ObjectStore>, cipher: ImageCipher) -> Self {
        Self { objects, cipher }
    }

    pub async fn put_image(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        let sealed = self.cipher.seal(key, data)?;
        self.objects.put(key, &sealed, content_type).await
    }

    pub async fn get_image(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let sealed = self.objects.get(key).await?;
        Ok(self.cipher.open(key, &sealed)?)
    }

    pub async fn delete_image(&self, key: &str) -> Result<(), StorageError> {
        self.objects.delete(key).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object storage returned HTTP {0}")]
    Status(u16),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
