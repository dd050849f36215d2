use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use image::ImageFormat;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::api::{StatusResponse, UploadForm, UploadResponse};
use crate::models::job::{Job, NewJob, Transition};

/// POST /upload — accept an image and queue it for captioning and regeneration.
///
/// The image is stored before the job record is created, and the record exists
/// before its id is published, so a worker never sees an id without a record.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let mut email: Option<String> = None;
    let mut upload: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("email") => {
                let text = field.text().await.map_err(malformed)?;
                email = Some(text.trim().to_string());
            }
            Some("image") | Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(malformed)?;
                upload = Some((file_name, data.to_vec()));
            }
            _ => {}
        }
    }

    let email = email.filter(|e| !e.is_empty());
    let upload = upload.filter(|(_, data)| !data.is_empty());
    let (email, (file_name, data)) = match (email, upload) {
        (Some(email), Some(upload)) => (email, upload),
        _ => {
            return Err(AppError::Validation(
                "Email and image are required".to_string(),
            ))
        }
    };

    let form = UploadForm { email };
    form.validate()
        .map_err(|_| AppError::Validation("Invalid email address".to_string()))?;

    let format = image::guess_format(&data)
        .map_err(|_| AppError::Validation("Unsupported image format".to_string()))?;

    let key = source_image_key(file_name.as_deref(), format);
    state
        .storage
        .upload(&key, &data, format.to_mime_type())
        .await?;

    let job = state
        .jobs
        .create(NewJob {
            email: form.email,
            source_image_ref: key,
        })
        .await?;

    if let Err(e) = state.queue.publish(job.id).await {
        tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
        let failed = Transition::Failed {
            error: "Job could not be queued".to_string(),
        };
        if let Err(store_err) = state.jobs.advance(job.id, failed).await {
            tracing::error!(job_id = %job.id, error = %store_err, "Failed to mark unqueued job as failed");
        }
        return Err(e.into());
    }

    metrics::counter!("image_jobs_submitted_total").increment(1);
    tracing::info!(
        job_id = %job.id,
        source_image_ref = %job.source_image_ref,
        bytes = data.len(),
        "Image job submitted"
    );

    Ok(Json(UploadResponse {
        message: "Image uploaded successfully!".to_string(),
        request_id: job.id.to_string(),
    }))
}

/// GET /status/{request_id} — current stage and artifacts of a job.
pub async fn job_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    let job = find_job(&state, &request_id).await?;

    Ok(Json(StatusResponse {
        status: job.status.to_string(),
        caption: job.caption,
        new_image_url: job
            .result_image_ref
            .as_deref()
            .map(|key| state.storage.public_url(key)),
        error: job.error,
    }))
}

/// Resolve a client-supplied id. Ids that do not parse are treated as unknown.
pub(crate) async fn find_job(state: &AppState, request_id: &str) -> AppResult<Job> {
    let id = Uuid::parse_str(request_id.trim())
        .map_err(|_| AppError::NotFound("Invalid request ID".to_string()))?;

    state
        .jobs
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Invalid request ID".to_string()))
}

fn malformed(err: axum::extract::multipart::MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge(err.body_text());
    }
    AppError::Validation(format!("Malformed upload: {}", err.body_text()))
}

/// Object key for an uploaded original: a random prefix keeps same-named
/// uploads apart, the file name is kept for readability.
fn source_image_key(file_name: Option<&str>, format: ImageFormat) -> String {
    let base = file_name
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(sanitize_file_name)
        .filter(|name| !name.is_empty() && !name.starts_with('.'));

    let name = match base {
        Some(name) => name,
        None => {
            let ext = format.extensions_str().first().copied().unwrap_or("img");
            format!("upload.{}", ext)
        }
    };

    format!("images/{}/{}", Uuid::new_v4(), name)
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .take(128)
        .collect()
}
