use getravio::{
    config::AppConfig,
    db,
    services::{
        auth::{MediaUrls, TokenService},
        encryption::ImageCipher,
        generation,
        notifier::Notifier,
        pipeline::{self, WorkerContext},
        queue::JobQueue,
        storage::{self, ImageStore},
    },
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting simulation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let objects = storage::from_config(&config).expect("Failed to initialize object storage");
    let cipher = ImageCipher::new(&config.encryption_key).expect("Failed to initialize encryption");

    let redis_client = redis::Client::open(config.redis_url.as_str()).expect("Invalid REDIS_URL");

    let generator = generation::from_config(&config).expect("Failed to initialize generation backend");

    let tokens = Arc::new(TokenService::new(config.jwt_secret.as_bytes(), config.token_ttl()));
    let media = MediaUrls::new(tokens, &config.public_base_url, config.media_url_ttl());

    let ctx = WorkerContext {
        db: db_pool,
        images: Arc::new(ImageStore::new(objects, cipher)),
        queue: Arc::new(JobQueue::from_client(redis_client.clone())),
        notifier: Arc::new(Notifier::new(redis_client)),
        generator,
        media: Arc::new(media),
        generation_timeout: Duration::from_secs(config.generation_timeout_secs),
    };
    let poll_interval = Duration::from_millis(config.worker_poll_interval_ms);

    tracing::info!(
        backend = ?config.generation_backend,
        timeout_secs = config.generation_timeout_secs,
        "Worker ready, starting job processing loop"
    );

    let stopping = Arc::new(AtomicBool::new(false));
    {
        let stopping = stopping.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received, finishing current job");
                stopping.store(true, Ordering::SeqCst);
            }
        });
    }

    // A job in flight is always finished; shutdown is only honoured between jobs
    while !stopping.load(Ordering::SeqCst) {
        match pipeline::process_next_job(&ctx).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job");
                sleep(poll_interval).await;
            }
        }
    }

    tracing::info!("Worker stopped");
}
