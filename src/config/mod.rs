use serde::Deserialize;

/// Where encrypted images are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
}

/// Which image generation backend the worker calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationBackend {
    Replicate,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Externally visible origin used to build media URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue and notifications
    pub redis_url: String,

    /// HMAC secret for session and media tokens
    pub jwt_secret: String,

    /// AES-256-GCM encryption key (base64-encoded, 32 bytes)
    pub encryption_key: String,

    #[serde(default = "default_storage_backend")]
    pub storage_backend: StorageBackend,

    /// Root directory for the local storage backend
    #[serde(default = "default_media_root")]
    pub media_root: String,

    pub s3_bucket: Option<String>,
    pub s3_endpoint: Option<String>,
    #[serde(default = "default_s3_region")]
    pub s3_region: String,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    /// Path-style addressing, needed by MinIO and most self-hosted endpoints
    #[serde(default)]
    pub s3_path_style: bool,

    #[serde(default = "default_generation_backend")]
    pub generation_backend: GenerationBackend,

    pub replicate_api_token: Option<String>,
    pub replicate_model_version: Option<String>,
    #[serde(default = "default_replicate_base_url")]
    pub replicate_base_url: String,
    #[serde(default = "default_replicate_poll_interval_ms")]
    pub replicate_poll_interval_ms: u64,

    pub local_inference_url: Option<String>,

    /// Upper bound on a single backend call
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,

    #[serde(default = "default_media_url_ttl_secs")]
    pub media_url_ttl_secs: i64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Comma-separated list of allowed origins. Empty means permissive.
    #[serde(default)]
    pub cors_allowed_origins: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_media_root() -> String {
    "./media".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_generation_backend() -> GenerationBackend {
    GenerationBackend::Replicate
}

fn default_replicate_base_url() -> String {
    crate::services::generation::DEFAULT_REPLICATE_BASE_URL.to_string()
}

fn default_replicate_poll_interval_ms() -> u64 {
    1500
}

fn default_generation_timeout_secs() -> u64 {
    300
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_media_url_ttl_secs() -> i64 {
    3600
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings required by the selected backends are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let require = |value: &Option<String>, name: &'static str| match value.as_deref() {
            Some(v) if !v.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::Missing(name)),
        };

        if self.jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid("JWT_SECRET must be at least 16 characters".into()));
        }

        if self.storage_backend == StorageBackend::S3 {
            require(&self.s3_bucket, "S3_BUCKET")?;
            require(&self.s3_endpoint, "S3_ENDPOINT")?;
            require(&self.s3_access_key, "S3_ACCESS_KEY")?;
            require(&self.s3_secret_key, "S3_SECRET_KEY")?;
        }

        match self.generation_backend {
            GenerationBackend::Replicate => {
                require(&self.replicate_api_token, "REPLICATE_API_TOKEN")?;
                require(&self.replicate_model_version, "REPLICATE_MODEL_VERSION")?;
            }
            GenerationBackend::Local => require(&self.local_inference_url, "LOCAL_INFERENCE_URL")?,
        }

        if self.token_ttl_hours <= 0 || self.media_url_ttl_secs <= 0 {
            return Err(ConfigError::Invalid("token lifetimes must be positive".into()));
        }

        Ok(())
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours)
    }

    pub fn media_url_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.media_url_ttl_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("{0} must be set for the selected backend")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
