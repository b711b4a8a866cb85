//! Per-job processing run by the worker binary.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::db::queries::{self, JobError};
use crate::models::job::{simulation_key, Job, JobStatus, ViewType};
use crate::services::auth::MediaUrls;
use crate::services::generation::{GenerationError, GenerationRequest, ImageGenerator, ProgressSink};
use crate::services::images::{ImageKind, ImageKindError};
use crate::services::notifier::Notifier;
use crate::services::prompts::build_prompt;
use crate::services::queue::{JobQueue, QueueError, QueuedJob};
use crate::services::storage::{ImageStore, StorageError};

/// Everything the worker needs to process jobs.
pub struct WorkerContext {
    pub db: PgPool,
    pub images: Arc<ImageStore>,
    pub queue: Arc<JobQueue>,
    pub notifier: Arc<Notifier>,
    pub generator: Arc<dyn ImageGenerator>,
    pub media: Arc<MediaUrls>,
    pub generation_timeout: Duration,
}

/// Publishes backend progress for one view of one job.
struct JobProgress<'a> {
    notifier: &'a Notifier,
    user_id: Uuid,
    job_id: Uuid,
    view: ViewType,
}

#[async_trait]
impl ProgressSink for JobProgress<'_> {
    async fn report(&self, step: u32, total: u32) {
        self.notifier
            .progress(self.user_id, self.job_id, self.view, step, total)
            .await;
    }
}

/// Take the next payload off the queue and process it.
/// Returns Ok(true) if a job was handled, Ok(false) if the queue was empty.
pub async fn process_next_job(ctx: &WorkerContext) -> Result<bool, PipelineError> {
    let payload = match ctx.queue.dequeue().await? {
        Some(p) => p,
        None => return Ok(false),
    };

    // The payload leaves the processing list whatever the outcome.
    let result = run_job(ctx, &payload).await;
    ctx.queue.complete(&payload).await?;
    result?;
    Ok(true)
}

/// Process one queued job to a terminal status.
///
/// Generation failures are recorded on the job and do not surface as errors;
/// only infrastructure failures (database, queue) are returned.
pub async fn run_job(ctx: &WorkerContext, payload: &QueuedJob) -> Result<(), PipelineError> {
    let job = match queries::transition_status(&ctx.db, payload.job_id, JobStatus::Processing).await {
        Ok(job) => job,
        Err(JobError::NotFound) => {
            tracing::warn!(job_id = %payload.job_id, "Queued job no longer exists, dropping");
            return Ok(());
        }
        Err(JobError::InvalidTransition { from, .. }) => {
            tracing::warn!(job_id = %payload.job_id, status = %from, "Job already picked up, dropping");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        job_id = %job.id,
        user_id = %job.owner.id,
        scenario = %job.scenario,
        view = %job.view_type,
        "Processing simulation job"
    );
    ctx.notifier.job_updated(&job, &ctx.media).await;

    let start = Instant::now();
    let outcome = match generate_results(ctx, &job).await {
        Ok((primary, secondary)) => {
            match queries::complete_job(&ctx.db, job.id, &primary, secondary.as_deref()).await {
                Ok(done) => Ok(done),
                Err(JobError::NotFound) => {
                    tracing::warn!(job_id = %job.id, "Job deleted during processing, discarding results");
                    discard_results(ctx, job.id, std::iter::once(primary).chain(secondary)).await;
                    return Ok(());
                }
                Err(e) => {
                    discard_results(ctx, job.id, std::iter::once(primary).chain(secondary)).await;
                    Err(PipelineError::from(e))
                }
            }
        }
        Err(e) => Err(e),
    };
    let elapsed = start.elapsed();

    match outcome {
        Ok(done) => {
            metrics::counter!("simulation_jobs_completed").increment(1);
            metrics::histogram!("simulation_processing_seconds").record(elapsed.as_secs_f64());
            tracing::info!(
                job_id = %done.id,
                duration_ms = elapsed.as_millis() as u64,
                has_secondary = done.simulation2_key.is_some(),
                "Job completed"
            );
            ctx.notifier.job_updated(&done, &ctx.media).await;
        }
        Err(e) => {
            metrics::counter!("simulation_jobs_failed").increment(1);
            tracing::error!(job_id = %job.id, error = %e, "Job processing failed");
            match queries::fail_job(&ctx.db, job.id, &e.to_string()).await {
                Ok(failed) => ctx.notifier.job_updated(&failed, &ctx.media).await,
                Err(JobError::NotFound) => {
                    tracing::warn!(job_id = %job.id, "Job deleted during processing");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

/// Best-effort removal of stored results nothing will reference.
async fn discard_results(ctx: &WorkerContext, job_id: Uuid, keys: impl IntoIterator<Item = String>) {
    for key in keys {
        match ctx.images.delete_image(&key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => tracing::warn!(job_id = %job_id, key = %key, error = %e, "Failed to delete orphaned result"),
        }
    }
}

/// Generate the requested view, then its complement on a best-effort basis.
async fn generate_results(ctx: &WorkerContext, job: &Job) -> Result<(String, Option<String>), PipelineError> {
    let original = ctx.images.get_image(&job.original_image_key).await?;
    let kind = ImageKind::detect(&original)?;

    let primary = generate_view(ctx, job, &original, kind, job.view_type).await?;

    let complement = job.view_type.complement();
    let secondary = match generate_view(ctx, job, &original, kind, complement).await {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!(job_id = %job.id, view = %complement, error = %e, "Secondary view failed, keeping primary only");
            None
        }
    };

    Ok((primary, secondary))
}

/// Run the generator for one view and store the encrypted result.
async fn generate_view(
    ctx: &WorkerContext,
    job: &Job,
    original: &[u8],
    kind: ImageKind,
    view: ViewType,
) -> Result<String, PipelineError> {
    let request = GenerationRequest {
        image: original.to_vec(),
        kind,
        prompt: build_prompt(job.region, job.scenario, view, job.message.as_deref()),
    };
    let sink = JobProgress {
        notifier: &ctx.notifier,
        user_id: job.owner.id,
        job_id: job.id,
        view,
    };

    tracing::debug!(job_id = %job.id, view = %view, strength = request.prompt.strength, "Calling generation backend");
    let generated = tokio::time::timeout(ctx.generation_timeout, ctx.generator.generate(&request, &sink))
        .await
        .map_err(|_| GenerationError::Timeout(ctx.generation_timeout.as_secs()))??;

    let key = simulation_key(job.id, view, generated.kind.extension());
    ctx.images
        .put_image(&key, &generated.data, generated.kind.mime())
        .await?;
    tracing::debug!(job_id = %job.id, key = %key, "Stored generated view");
    Ok(key)
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Original image is unusable: {0}")]
    Image(#[from] ImageKindError),
}
