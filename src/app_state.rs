use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{
    auth::{MediaUrls, TokenService},
    notifier::{NotificationHub, Notifier},
    queue::JobQueue,
    storage::ImageStore,
};

/// Settings read by request handlers.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub max_upload_bytes: usize,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub images: Arc<ImageStore>,
    pub queue: Arc<JobQueue>,
    pub notifier: Arc<Notifier>,
    pub hub: NotificationHub,
    pub tokens: Arc<TokenService>,
    pub media: Arc<MediaUrls>,
    pub settings: Arc<ApiSettings>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: PgPool,
        images: ImageStore,
        queue: JobQueue,
        notifier: Notifier,
        hub: NotificationHub,
        tokens: Arc<TokenService>,
        media: MediaUrls,
        settings: ApiSettings,
    ) -> Self {
        Self {
            db,
            images: Arc::new(images),
            queue: Arc::new(queue),
            notifier: Arc::new(notifier),
            hub,
            tokens,
            media: Arc::new(media),
            settings: Arc::new(settings),
        }
    }
}
