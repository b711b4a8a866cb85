use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use garde::Validate;
use std::str::FromStr;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries::{self, JobFilter, JobScope};
use crate::error::ApiError;
use crate::models::job::{original_key, Job, NewJob, Region, Scenario, ViewType};
use crate::models::requests::{
    FavoriteRequest, JobListQuery, JobUpdateRequest, SelectRequest, MAX_MESSAGE_LEN,
};
use crate::models::responses::{JobListResponse, JobResponse};
use crate::routes::extract::{ApiJson, ApiQuery, AuthUser};
use crate::services::images::{ImageKind, ImageKindError};
use crate::services::queue::QueuedJob;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

fn respond(state: &AppState, job: &Job) -> Result<Json<JobResponse>, ApiError> {
    Ok(Json(JobResponse::build(job, &state.media)?))
}

/// Parse a `date_from`/`date_to` bound: RFC 3339, or a bare `YYYY-MM-DD`.
///
/// Returns the inclusive lower bound for `date_from` and the exclusive upper
/// bound for `date_to`, so a bare date covers that whole day.
fn parse_bound(value: &str, upper: bool) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        let ts = ts.with_timezone(&Utc);
        // stored timestamps have microsecond precision
        return Ok(if upper { ts + chrono::Duration::microseconds(1) } else { ts });
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{value}', expected YYYY-MM-DD or RFC 3339")))?;
    let date = if upper {
        date.succ_opt()
            .ok_or_else(|| ApiError::BadRequest(format!("Date out of range: {value}")))?
    } else {
        date
    };
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// Turn list query parameters into a database filter.
fn list_filter(auth: &AuthUser, query: JobListQuery) -> Result<(JobFilter, u32, u32), ApiError> {
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::BadRequest("page must be at least 1".to_string()));
    }
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ApiError::BadRequest(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    // user_id is a staff-only filter; everyone else is pinned to their own jobs
    let scope = match (auth.scope(), query.user_id) {
        (JobScope::Any, Some(user_id)) => JobScope::Owner(user_id),
        (scope, _) => scope,
    };

    let filter = JobFilter {
        scope,
        status: query.status,
        favorites_only: query.favorites.unwrap_or(false),
        created_from: query.date_from.as_deref().map(|v| parse_bound(v, false)).transpose()?,
        created_before: query.date_to.as_deref().map(|v| parse_bound(v, true)).transpose()?,
        search: query.search,
        limit: i64::from(page_size),
        offset: i64::from(page - 1) * i64::from(page_size),
    };
    Ok((filter, page, page_size))
}

/// GET /api/jobs/
pub async fn list_jobs(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<JobListQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let (filter, page, page_size) = list_filter(&auth, query)?;
    let (jobs, count) = queries::list_jobs(&state.db, &filter).await?;

    let results = jobs
        .iter()
        .map(|job| JobResponse::build(job, &state.media))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(JobListResponse {
        count,
        page,
        page_size,
        results,
    }))
}

/// Upload fields collected from the multipart body.
#[derive(Default)]
struct Upload {
    image: Option<(Bytes, ImageKind)>,
    region: Option<Region>,
    scenario: Option<Scenario>,
    view_type: Option<ViewType>,
    message: Option<String>,
}

fn parse_choice<T: FromStr>(field: &str, value: &str) -> Result<Option<T>, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("Invalid {field} '{value}'")))
}

async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<Upload, ApiError> {
    let mut upload = Upload::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let data = field.bytes().await?;
                if data.len() > max_bytes {
                    return Err(ApiError::PayloadTooLarge(format!(
                        "Image exceeds the {} MB limit",
                        max_bytes / (1024 * 1024)
                    )));
                }
                // Content decides the format, not the client-declared type
                let kind = ImageKind::detect(&data).map_err(|e| match e {
                    ImageKindError::NotAnImage => {
                        ApiError::UnsupportedMediaType("Upload is not an image".to_string())
                    }
                    ImageKindError::Unsupported(_) => ApiError::UnsupportedMediaType(
                        "Only JPEG, PNG and WebP images are accepted".to_string(),
                    ),
                })?;
                upload.image = Some((data, kind));
            }
            "region" => upload.region = parse_choice("region", &field.text().await?)?,
            "scenario" => upload.scenario = parse_choice("scenario", &field.text().await?)?,
            "view_type" => upload.view_type = parse_choice("view_type", &field.text().await?)?,
            "message" => {
                let text = field.text().await?;
                let text = text.trim();
                if text.chars().count() > MAX_MESSAGE_LEN {
                    return Err(ApiError::BadRequest(format!(
                        "message must be at most {MAX_MESSAGE_LEN} characters"
                    )));
                }
                upload.message = (!text.is_empty()).then(|| text.to_string());
            }
            _ => {}
        }
    }

    Ok(upload)
}

/// POST /api/jobs/: upload a photo and queue a simulation.
pub async fn create_job(
    State(state): State<AppState>,
    auth: AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let upload = read_upload(multipart, state.settings.max_upload_bytes).await?;
    let (data, kind) = upload
        .image
        .ok_or_else(|| ApiError::BadRequest("An image file is required".to_string()))?;

    let job_id = Uuid::new_v4();
    let image_key = original_key(job_id, kind.extension());
    state.images.put_image(&image_key, &data, kind.mime()).await?;

    let new_job = NewJob {
        id: job_id,
        user_id: auth.user.id,
        region: upload.region.unwrap_or_default(),
        scenario: upload.scenario.unwrap_or_default(),
        view_type: upload.view_type.unwrap_or_default(),
        message: upload.message,
        original_image_key: image_key.clone(),
    };
    let job = match queries::create_job(&state.db, &new_job).await {
        Ok(job) => job,
        Err(e) => {
            if let Err(cleanup) = state.images.delete_image(&image_key).await {
                tracing::warn!(job_id = %job_id, error = %cleanup, "Failed to remove orphaned upload");
            }
            return Err(e.into());
        }
    };

    let payload = QueuedJob {
        job_id: job.id,
        user_id: job.owner.id,
    };
    if let Err(e) = state.queue.enqueue(&payload).await {
        tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
        let failed = queries::fail_job(&state.db, job.id, "Could not queue the job for processing").await?;
        state.notifier.job_updated(&failed, &state.media).await;
        return Err(e.into());
    }

    metrics::counter!("simulation_jobs_total").increment(1);
    tracing::info!(
        job_id = %job.id,
        user_id = %job.owner.id,
        scenario = %job.scenario,
        view = %job.view_type,
        bytes = data.len(),
        "Simulation job queued"
    );
    state.notifier.job_updated(&job, &state.media).await;

    Ok((StatusCode::CREATED, respond(&state, &job)?))
}

/// GET /api/jobs/{id}/
pub async fn get_job(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = queries::get_job_scoped(&state.db, job_id, auth.scope()).await?;
    respond(&state, &job)
}

/// PATCH /api/jobs/{id}/: only `message` and `is_favorite` are writable.
pub async fn update_job(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(job_id): Path<Uuid>,
    ApiJson(request): ApiJson<JobUpdateRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    let request = request.trimmed();
    request.validate()?;
    let job = queries::update_job_fields(
        &state.db,
        job_id,
        auth.scope(),
        request.message.as_deref(),
        request.is_favorite,
    )
    .await?;
    state.notifier.job_updated(&job, &state.media).await;
    respond(&state, &job)
}

/// DELETE /api/jobs/{id}/: removes the row, then the stored images.
pub async fn delete_job(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let job = queries::delete_job(&state.db, job_id, auth.scope()).await?;

    let keys = std::iter::once(job.original_image_key.as_str())
        .chain(job.simulation1_key.as_deref())
        .chain(job.simulation2_key.as_deref());
    for key in keys {
        if let Err(e) = state.images.delete_image(key).await {
            tracing::warn!(job_id = %job.id, key = %key, error = %e, "Failed to delete stored image");
        }
    }

    tracing::info!(job_id = %job.id, user_id = %auth.user.id, "Job deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/jobs/{id}/favorite/: toggles without a body, sets with one.
pub async fn favorite_job(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(job_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<JobResponse>, ApiError> {
    let value = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let request: FavoriteRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid favorite request: {e}")))?;
        Some(request.is_favorite)
    };

    let job = queries::set_favorite(&state.db, job_id, auth.scope(), value).await?;
    state.notifier.job_updated(&job, &state.media).await;
    respond(&state, &job)
}

/// POST /api/jobs/{id}/select/
pub async fn select_result(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(job_id): Path<Uuid>,
    ApiJson(request): ApiJson<SelectRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = queries::select_result(&state.db, job_id, auth.scope(), request.selected).await?;
    state.notifier.job_updated(&job, &state.media).await;
    respond(&state, &job)
}
