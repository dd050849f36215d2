use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::app_state::AppState;

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod pipeline;

/// Application routes, without the metrics endpoint and outer middleware.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/upload", post(jobs::upload_image))
        .route("/status/{request_id}", get(jobs::job_status))
        .route("/caption", post(pipeline::caption_image))
        .route("/generate_image", post(pipeline::generate_image))
        .route("/send_email", post(pipeline::send_email))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}
