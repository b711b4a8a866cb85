use axum::http::HeaderValue;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use getravio::app_state::{ApiSettings, AppState};
use getravio::config::AppConfig;
use getravio::db;
use getravio::routes;
use getravio::services::{
    auth::{MediaUrls, TokenService},
    encryption::ImageCipher,
    notifier::{self, NotificationHub, Notifier},
    queue::JobQueue,
    storage::{self, ImageStore},
};

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing getravio API server");

    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!(backend = ?config.storage_backend, "Initializing image storage");
    let objects = storage::from_config(&config).expect("Failed to initialize object storage");
    let cipher = ImageCipher::new(&config.encryption_key).expect("Failed to initialize encryption");
    let images = ImageStore::new(objects, cipher);

    tracing::info!("Connecting to Redis");
    let redis_client = redis::Client::open(config.redis_url.as_str()).expect("Invalid REDIS_URL");
    let queue = JobQueue::from_client(redis_client.clone());
    let notifier = Notifier::new(redis_client.clone());

    let hub = NotificationHub::new();
    tokio::spawn(notifier::run_relay(redis_client, hub.clone()));

    let tokens = Arc::new(TokenService::new(config.jwt_secret.as_bytes(), config.token_ttl()));
    let media = MediaUrls::new(tokens.clone(), &config.public_base_url, config.media_url_ttl());

    let state = AppState::new(
        db_pool,
        images,
        queue,
        notifier,
        hub,
        tokens,
        media,
        ApiSettings {
            max_upload_bytes: config.max_upload_bytes,
        },
    );

    let app = routes::router(state, prometheus_handle)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer(&config))
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes + 1024 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
