use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, NewJob, ResultSlot};
use crate::models::user::UserSummary;

/// Maximum stored length of a failure message.
pub const MAX_ERROR_LEN: usize = 500;

/// Columns of a job joined with its owner. Every job query reads through
/// `jobs j JOIN users u`, including the CTEs wrapping writes.
macro_rules! job_columns {
    () => {
        "j.id, j.user_id, j.region, j.scenario, j.view_type, j.status, j.message, \
         j.original_image_key, j.simulation1_key, j.simulation2_key, j.selected_simulation, \
         j.is_favorite, j.error_message, j.created_at, j.updated_at, \
         j.processing_started_at, j.completed_at, \
         u.username AS owner_username, u.email AS owner_email"
    };
}

/// Wrap a data-modifying statement so its returned rows come back joined
/// with the owner.
macro_rules! returning_job {
    ($write:literal) => {
        concat!(
            "WITH j AS (",
            $write,
            " RETURNING *) SELECT ",
            job_columns!(),
            " FROM j JOIN users u ON u.id = j.user_id"
        )
    };
}

/// Which jobs a caller may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobScope {
    /// Only jobs owned by this user.
    Owner(Uuid),
    /// Every job (staff).
    Any,
}

impl JobScope {
    pub fn for_user(user_id: Uuid, is_staff: bool) -> Self {
        if is_staff {
            JobScope::Any
        } else {
            JobScope::Owner(user_id)
        }
    }

    fn owner(self) -> Option<Uuid> {
        match self {
            JobScope::Owner(id) => Some(id),
            JobScope::Any => None,
        }
    }
}

/// Filters for the job listing.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub scope: JobScope,
    pub status: Option<JobStatus>,
    pub favorites_only: bool,
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            scope: JobScope::Any,
            status: None,
            favorites_only: false,
            created_from: None,
            created_before: None,
            search: None,
            limit: 20,
            offset: 0,
        }
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let selected: Option<String> = row.try_get("selected_simulation")?;
    let selected_simulation = selected
        .map(|s| ResultSlot::from_str(&s))
        .transpose()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: "selected_simulation".to_string(),
            source: Box::new(e),
        })?;

    Ok(Job {
        id: row.try_get("id")?,
        owner: UserSummary {
            id: row.try_get("user_id")?,
            username: row.try_get("owner_username")?,
            email: row.try_get("owner_email")?,
        },
        region: parse_column(row, "region")?,
        scenario: parse_column(row, "scenario")?,
        view_type: parse_column(row, "view_type")?,
        status: parse_column(row, "status")?,
        message: row.try_get("message")?,
        original_image_key: row.try_get("original_image_key")?,
        simulation1_key: row.try_get("simulation1_key")?,
        simulation2_key: row.try_get("simulation2_key")?,
        selected_simulation,
        is_favorite: row.try_get("is_favorite")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        processing_started_at: row.try_get("processing_started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn status_names(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.to_string()).collect()
}

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Cut a failure message down to `MAX_ERROR_LEN` characters.
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

/// Insert a new job in `queued` status.
pub async fn create_job(pool: &PgPool, job: &NewJob) -> Result<Job, JobError> {
    let row = sqlx::query(returning_job!(
        "INSERT INTO jobs (id, user_id, region, scenario, view_type, status, message, original_image_key) \
         VALUES ($1, $2, $3, $4, $5, 'queued', $6, $7)"
    ))
    .bind(job.id)
    .bind(job.user_id)
    .bind(job.region.as_ref())
    .bind(job.scenario.as_ref())
    .bind(job.view_type.as_ref())
    .bind(job.message.as_deref())
    .bind(&job.original_image_key)
    .fetch_one(pool)
    .await?;

    Ok(job_from_row(&row)?)
}

/// Get a job by ID regardless of owner.
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, JobError> {
    let row = sqlx::query(concat!(
        "SELECT ",
        job_columns!(),
        " FROM jobs j JOIN users u ON u.id = j.user_id WHERE j.id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(job_from_row).transpose()?)
}

/// Get a job visible in `scope`. Jobs outside the scope are reported as
/// not found.
pub async fn get_job_scoped(pool: &PgPool, job_id: Uuid, scope: JobScope) -> Result<Job, JobError> {
    let row = sqlx::query(concat!(
        "SELECT ",
        job_columns!(),
        " FROM jobs j JOIN users u ON u.id = j.user_id \
         WHERE j.id = $1 AND ($2::uuid IS NULL OR j.user_id = $2)"
    ))
    .bind(job_id)
    .bind(scope.owner())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(job_from_row(&row)?),
        None => Err(JobError::NotFound),
    }
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a JobFilter) {
    if let Some(owner) = filter.scope.owner() {
        qb.push(" AND j.user_id = ").push_bind(owner);
    }
    if let Some(status) = filter.status {
        qb.push(" AND j.status = ").push_bind(status.to_string());
    }
    if filter.favorites_only {
        qb.push(" AND j.is_favorite");
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND j.created_at >= ").push_bind(from);
    }
    if let Some(before) = filter.created_before {
        qb.push(" AND j.created_at < ").push_bind(before);
    }
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (j.message ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR j.region ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR j.scenario ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// List jobs newest first. Returns the page and the total matching count.
pub async fn list_jobs(pool: &PgPool, filter: &JobFilter) -> Result<(Vec<Job>, i64), JobError> {
    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM jobs j WHERE TRUE");
    push_filters(&mut count_qb, filter);
    let total = count_qb.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut qb = QueryBuilder::new(concat!(
        "SELECT ",
        job_columns!(),
        " FROM jobs j JOIN users u ON u.id = j.user_id WHERE TRUE"
    ));
    push_filters(&mut qb, filter);
    qb.push(" ORDER BY j.created_at DESC, j.id DESC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);

    let rows = qb.build().fetch_all(pool).await?;
    let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((jobs, total))
}

/// Tell apart a missing job from one whose status blocked a guarded update.
async fn rejected_transition(pool: &PgPool, job_id: Uuid, next: JobStatus) -> JobError {
    match sqlx::query("SELECT status FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await
    {
        Ok(Some(row)) => match parse_column::<JobStatus>(&row, "status") {
            Ok(from) => JobError::InvalidTransition { from, to: next },
            Err(e) => JobError::Database(e),
        },
        Ok(None) => JobError::NotFound,
        Err(e) => JobError::Database(e),
    }
}

/// Move a job to `next` if its current status allows it.
///
/// Entering `processing` stamps `processing_started_at`; entering a terminal
/// status stamps `completed_at`.
pub async fn transition_status(pool: &PgPool, job_id: Uuid, next: JobStatus) -> Result<Job, JobError> {
    let row = sqlx::query(returning_job!(
        "UPDATE jobs SET status = $2, updated_at = NOW(), \
         processing_started_at = CASE WHEN $2 = 'processing' THEN NOW() ELSE processing_started_at END, \
         completed_at = CASE WHEN $2 IN ('completed', 'failed') THEN NOW() ELSE completed_at END \
         WHERE id = $1 AND status = ANY($3)"
    ))
    .bind(job_id)
    .bind(next.to_string())
    .bind(status_names(next.predecessors()))
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(job_from_row(&row)?),
        None => Err(rejected_transition(pool, job_id, next).await),
    }
}

/// Mark a processing job completed and record its result keys in one statement.
pub async fn complete_job(
    pool: &PgPool,
    job_id: Uuid,
    simulation1_key: &str,
    simulation2_key: Option<&str>,
) -> Result<Job, JobError> {
    let row = sqlx::query(returning_job!(
        "UPDATE jobs SET status = 'completed', simulation1_key = $2, simulation2_key = $3, \
         error_message = NULL, completed_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = ANY($4)"
    ))
    .bind(job_id)
    .bind(simulation1_key)
    .bind(simulation2_key)
    .bind(status_names(JobStatus::Completed.predecessors()))
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(job_from_row(&row)?),
        None => Err(rejected_transition(pool, job_id, JobStatus::Completed).await),
    }
}

/// Mark a job failed with a (truncated) reason.
pub async fn fail_job(pool: &PgPool, job_id: Uuid, reason: &str) -> Result<Job, JobError> {
    let row = sqlx::query(returning_job!(
        "UPDATE jobs SET status = 'failed', error_message = $2, completed_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = ANY($3)"
    ))
    .bind(job_id)
    .bind(truncate_error(reason))
    .bind(status_names(JobStatus::Failed.predecessors()))
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(job_from_row(&row)?),
        None => Err(rejected_transition(pool, job_id, JobStatus::Failed).await),
    }
}

/// Set the favorite flag, or toggle it when `value` is `None`.
pub async fn set_favorite(
    pool: &PgPool,
    job_id: Uuid,
    scope: JobScope,
    value: Option<bool>,
) -> Result<Job, JobError> {
    let row = sqlx::query(returning_job!(
        "UPDATE jobs SET is_favorite = COALESCE($3, NOT is_favorite), updated_at = NOW() \
         WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)"
    ))
    .bind(job_id)
    .bind(scope.owner())
    .bind(value)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(job_from_row(&row)?),
        None => Err(JobError::NotFound),
    }
}

/// Update the owner-editable fields. `None` leaves a field unchanged; an
/// empty message clears it.
pub async fn update_job_fields(
    pool: &PgPool,
    job_id: Uuid,
    scope: JobScope,
    message: Option<&str>,
    is_favorite: Option<bool>,
) -> Result<Job, JobError> {
    let row = sqlx::query(returning_job!(
        "UPDATE jobs SET \
         message = CASE WHEN $3::text IS NULL THEN message ELSE NULLIF(BTRIM($3), '') END, \
         is_favorite = COALESCE($4, is_favorite), updated_at = NOW() \
         WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)"
    ))
    .bind(job_id)
    .bind(scope.owner())
    .bind(message)
    .bind(is_favorite)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(job_from_row(&row)?),
        None => Err(JobError::NotFound),
    }
}

/// Choose which result slot is the preferred one, or clear the choice.
pub async fn select_result(
    pool: &PgPool,
    job_id: Uuid,
    scope: JobScope,
    slot: Option<ResultSlot>,
) -> Result<Job, JobError> {
    let job = get_job_scoped(pool, job_id, scope).await?;
    if let Some(slot) = slot {
        if !job.has_result(slot) {
            return Err(JobError::EmptySlot(slot));
        }
    }

    let row = sqlx::query(returning_job!(
        "UPDATE jobs SET selected_simulation = $2, updated_at = NOW() WHERE id = $1"
    ))
    .bind(job_id)
    .bind(slot.map(|s| s.to_string()))
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(job_from_row(&row)?),
        None => Err(JobError::NotFound),
    }
}

/// Delete a job row, returning it so the caller can clean up stored objects.
pub async fn delete_job(pool: &PgPool, job_id: Uuid, scope: JobScope) -> Result<Job, JobError> {
    let row = sqlx::query(returning_job!(
        "DELETE FROM jobs WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)"
    ))
    .bind(job_id)
    .bind(scope.owner())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(job_from_row(&row)?),
        None => Err(JobError::NotFound),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job not found")]
    NotFound,

    #[error("Cannot move job from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("{0} has no generated result")]
    EmptySlot(ResultSlot),
}
