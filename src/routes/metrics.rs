use axum::extract::State;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the global Prometheus recorder and describe the job metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

pub fn describe_metrics() {
    metrics::describe_counter!(
        "image_jobs_submitted_total",
        "Image jobs accepted by the upload endpoint"
    );
    metrics::describe_counter!(
        "image_jobs_completed_total",
        "Image jobs that reached the done state"
    );
    metrics::describe_counter!(
        "image_jobs_failed_total",
        "Image jobs that ended in the failed state"
    );
    metrics::describe_histogram!(
        "image_job_processing_seconds",
        "Wall time the worker spent on one job"
    );
    metrics::describe_gauge!(
        "image_queue_depth",
        "Job ids waiting in the queue"
    );
}

/// GET /metrics — Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
