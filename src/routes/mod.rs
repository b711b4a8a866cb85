use axum::extract::DefaultBodyLimit;
use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::app_state::AppState;

pub mod auth;
pub mod extract;
pub mod health;
pub mod jobs;
pub mod media;
pub mod metrics;
pub mod profile;
pub mod ws;

/// Headroom for multipart framing and text fields around the image.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the full application router.
pub fn router(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let upload_limit = state.settings.max_upload_bytes + MULTIPART_OVERHEAD;

    let api = Router::new()
        .route("/auth/csrf", get(auth::csrf_token))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/profile", get(profile::get_profile).patch(profile::update_profile))
        .route(
            "/jobs/",
            get(jobs::list_jobs)
                .post(jobs::create_job)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/jobs/{id}/",
            get(jobs::get_job)
                .patch(jobs::update_job)
                .delete(jobs::delete_job),
        )
        .route("/jobs/{id}/favorite/", post(jobs::favorite_job))
        .route("/jobs/{id}/select/", post(jobs::select_result));

    Router::new()
        .route("/", get(|| async { Html(include_str!("../../static/index.html")) }))
        .route("/health", get(health::health_check))
        .route("/media/{*key}", get(media::serve_media))
        .route("/ws/jobs/", get(ws::job_updates))
        .nest("/api", api)
        .with_state(state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(metrics_handle),
        )
}
