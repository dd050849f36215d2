//! Queue consumer: drives one job at a time through captioning and generation.
//!
//! A received message stays in the queue's processing list until the job
//! record reflects the outcome. Record-store failures put the message back so
//! the job is picked up again; upstream failures end the job as `failed`.

use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::models::job::{Job, JobStatus, Transition};
use crate::services::email::EmailError;
use crate::services::queue::{JobQueue, QueueError, HEARTBEAT_INTERVAL};
use crate::services::storage;

/// What happened to a job id taken off the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// No record exists for the id.
    Missing,
    /// The record was already terminal; nothing changed.
    AlreadyFinished(JobStatus),
    Completed,
    Failed,
    /// Another writer moved the record on while this worker was processing it.
    Superseded,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Keep this consumer's heartbeat fresh and pick up messages held by consumers
/// that died. Runs until the task is dropped.
pub async fn keep_alive(queue: Arc<dyn JobQueue>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = queue.heartbeat().await {
            tracing::warn!(error = %e, "Failed to refresh worker heartbeat");
            continue;
        }
        match queue.recover_in_flight().await {
            Ok(0) => {}
            Ok(moved) => tracing::warn!(moved, "Requeued messages held by a dead worker"),
            Err(e) => tracing::error!(error = %e, "Failed to recover in-flight messages"),
        }
    }
}

/// Take one message off the queue and process it.
/// Returns Ok(true) if a message was handled, Ok(false) if the queue was empty.
pub async fn process_next(state: &AppState) -> Result<bool, WorkerError> {
    let delivery = match state.queue.receive().await? {
        Some(d) => d,
        None => return Ok(false),
    };

    let job_id = match delivery.job_id() {
        Some(id) => id,
        None => {
            tracing::warn!(payload = %delivery.payload, "Discarding malformed queue message");
            state.queue.ack(&delivery).await?;
            return Ok(true);
        }
    };

    match process_job(state, job_id).await {
        Ok(outcome) => {
            state.queue.ack(&delivery).await?;
            tracing::debug!(job_id = %job_id, outcome = ?outcome, "Message acknowledged");
            Ok(true)
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Job store error, requeueing");
            state.queue.requeue(&delivery).await?;
            Err(e.into())
        }
    }
}

/// Advance a job as far as it can go.
///
/// Safe to call repeatedly for the same id: terminal jobs are left alone and a
/// job already `captioned` resumes at generation.
pub async fn process_job(state: &AppState, job_id: Uuid) -> Result<JobOutcome, StoreError> {
    let job = match state.jobs.get(job_id).await? {
        Some(job) => job,
        None => {
            tracing::warn!(job_id = %job_id, "Job record not found, skipping");
            return Ok(JobOutcome::Missing);
        }
    };

    if job.status.is_terminal() {
        tracing::info!(job_id = %job_id, status = %job.status, "Job already finished, skipping");
        return Ok(JobOutcome::AlreadyFinished(job.status));
    }

    tracing::info!(
        job_id = %job_id,
        status = %job.status,
        source_image_ref = %job.source_image_ref,
        "Processing image job"
    );
    let start = Instant::now();

    let caption = match (job.status, job.caption.clone()) {
        (JobStatus::Captioned, Some(caption)) => caption,
        _ => match caption_step(state, &job).await? {
            Ok(caption) => caption,
            Err(outcome) => return Ok(finish(start, outcome)),
        },
    };

    let outcome = generation_step(state, &job, &caption).await?;
    Ok(finish(start, outcome))
}

fn finish(start: Instant, outcome: JobOutcome) -> JobOutcome {
    let elapsed = start.elapsed();
    metrics::histogram!("image_job_processing_seconds").record(elapsed.as_secs_f64());
    match outcome {
        JobOutcome::Completed => metrics::counter!("image_jobs_completed_total").increment(1),
        JobOutcome::Failed => metrics::counter!("image_jobs_failed_total").increment(1),
        _ => {}
    }
    outcome
}

/// Caption the source image and record it. The inner `Err` carries the outcome
/// when processing has to stop here.
async fn caption_step(
    state: &AppState,
    job: &Job,
) -> Result<Result<String, JobOutcome>, StoreError> {
    let image = match state.storage.download(&job.source_image_ref).await {
        Ok(bytes) => bytes,
        Err(e) => {
            fail(state, job.id, format!("Source image unavailable: {}", e)).await?;
            return Ok(Err(JobOutcome::Failed));
        }
    };

    let caption = match state.captioner.caption(&image).await {
        Ok(caption) => caption,
        Err(e) => {
            fail(state, job.id, format!("Captioning failed: {}", e)).await?;
            return Ok(Err(JobOutcome::Failed));
        }
    };

    let applied = state
        .jobs
        .advance(
            job.id,
            Transition::Captioned {
                caption: caption.clone(),
            },
        )
        .await?;
    if !applied {
        tracing::warn!(job_id = %job.id, "Job left pending state during captioning");
        return Ok(Err(JobOutcome::Superseded));
    }

    tracing::info!(job_id = %job.id, caption = %caption, "Caption recorded");
    Ok(Ok(caption))
}

async fn generation_step(
    state: &AppState,
    job: &Job,
    caption: &str,
) -> Result<JobOutcome, StoreError> {
    let bytes = match state.generator.generate(caption).await {
        Ok(bytes) => bytes,
        Err(e) => {
            fail(state, job.id, format!("Image generation failed: {}", e)).await?;
            return Ok(JobOutcome::Failed);
        }
    };

    let stem = format!("generated/{}", job.id);
    let key = match storage::store_image(state.storage.as_ref(), &stem, &bytes).await {
        Ok(key) => key,
        Err(e) => {
            fail(state, job.id, format!("Storing generated image failed: {}", e)).await?;
            return Ok(JobOutcome::Failed);
        }
    };

    let applied = state
        .jobs
        .advance(
            job.id,
            Transition::Done {
                result_image_ref: key.clone(),
            },
        )
        .await?;
    if !applied {
        tracing::warn!(job_id = %job.id, "Job left captioned state during generation");
        return Ok(JobOutcome::Superseded);
    }

    tracing::info!(job_id = %job.id, result_image_ref = %key, "Job completed");
    notify(state, job, &key).await;
    Ok(JobOutcome::Completed)
}

async fn fail(state: &AppState, job_id: Uuid, error: String) -> Result<(), StoreError> {
    tracing::warn!(job_id = %job_id, error = %error, "Job failed");
    state
        .jobs
        .advance(job_id, Transition::Failed { error })
        .await?;
    Ok(())
}

/// Best-effort result email. Never changes the job record.
async fn notify(state: &AppState, job: &Job, result_key: &str) {
    let url = state.storage.public_url(result_key);

    match state.notifier.send_result(&job.email, &url).await {
        Ok(()) => tracing::info!(
            job_id = %job.id,
            provider = %state.notifier.provider(),
            "Result email sent"
        ),
        Err(EmailError::Disabled) => {
            tracing::debug!(job_id = %job.id, "Email provider not configured, skipping notification")
        }
        Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Result email failed"),
    }
}
