use axum::extract::State;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::AppResult;
use crate::models::api::{
    CaptionRequest, CaptionResponse, GenerateImageRequest, GenerateImageResponse,
    MessageResponse, SendEmailRequest,
};
use crate::models::job::{Job, Transition};
use crate::routes::jobs::find_job;
use crate::services::storage;

async fn lookup(state: &AppState, request_id: Option<&str>) -> AppResult<Option<Job>> {
    match request_id {
        Some(id) => Ok(Some(find_job(state, id).await?)),
        None => Ok(None),
    }
}

/// Record a stage result on the job. An illegal step is logged, not an error:
/// the caller still gets the artifact it asked for.
async fn record(state: &AppState, job: &Job, transition: Transition) -> AppResult<()> {
    let target = transition.target();
    if !state.jobs.advance(job.id, transition).await? {
        tracing::warn!(
            job_id = %job.id,
            current = %job.status,
            target = %target,
            "Job did not accept stage result"
        );
    }
    Ok(())
}

/// POST /caption — caption an image by locator.
pub async fn caption_image(
    State(state): State<AppState>,
    Json(req): Json<CaptionRequest>,
) -> AppResult<Json<CaptionResponse>> {
    req.validate()?;
    let job = lookup(&state, req.request_id.as_deref()).await?;

    let image = storage::fetch_image(
        state.storage.as_ref(),
        &state.http,
        &req.image_url,
        state.max_image_bytes,
    )
    .await?;
    let caption = state.captioner.caption(&image).await?;

    if let Some(job) = &job {
        record(
            &state,
            job,
            Transition::Captioned {
                caption: caption.clone(),
            },
        )
        .await?;
    }

    Ok(Json(CaptionResponse { caption }))
}

/// POST /generate_image — generate and store an image from a caption.
pub async fn generate_image(
    State(state): State<AppState>,
    Json(req): Json<GenerateImageRequest>,
) -> AppResult<Json<GenerateImageResponse>> {
    req.validate()?;
    let job = lookup(&state, req.request_id.as_deref()).await?;

    let bytes = state.generator.generate(&req.caption).await?;
    let stem_id = job.as_ref().map(|j| j.id).unwrap_or_else(Uuid::new_v4);
    let key = storage::store_image(
        state.storage.as_ref(),
        &format!("generated/{}", stem_id),
        &bytes,
    )
    .await?;

    if let Some(job) = &job {
        record(
            &state,
            job,
            Transition::Done {
                result_image_ref: key.clone(),
            },
        )
        .await?;
    }

    Ok(Json(GenerateImageResponse {
        image_url: state.storage.public_url(&key),
    }))
}

/// POST /send_email — email an image link through the configured provider.
pub async fn send_email(
    State(state): State<AppState>,
    Json(req): Json<SendEmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    req.validate()?;
    state.notifier.send_result(&req.email, &req.image_url).await?;

    tracing::info!(provider = %state.notifier.provider(), "Result email sent");
    Ok(Json(MessageResponse {
        message: "Email sent successfully!".to_string(),
    }))
}
