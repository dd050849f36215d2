use metrics_exporter_prometheus::PrometheusBuilder;
use recaption::{app_state::AppState, config::AppConfig, db, routes, worker};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image job worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let poll_interval = Duration::from_millis(config.worker_poll_interval_ms);

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        routes::metrics::describe_metrics();
        tracing::info!(%addr, "Serving worker metrics");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let state = AppState::from_config(&config, db_pool).expect("Failed to initialize services");

    // Register as alive first, then reclaim messages held by workers whose
    // heartbeat has lapsed. Live workers keep theirs.
    state
        .queue
        .heartbeat()
        .await
        .expect("Failed to register worker heartbeat");
    match state.queue.recover_in_flight().await {
        Ok(0) => {}
        Ok(moved) => tracing::warn!(moved, "Requeued messages held by dead workers"),
        Err(e) => tracing::error!(error = %e, "Failed to recover in-flight messages"),
    }
    let heartbeat = tokio::spawn(worker::keep_alive(state.queue.clone()));

    tracing::info!("Worker ready, starting job processing loop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let result = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, stopping worker");
                break;
            }
            result = worker::process_next(&state) => result,
        };

        match result {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
                record_queue_depth(&state).await;
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                record_queue_depth(&state).await;
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, backing off");
                sleep(poll_interval).await;
            }
        }
    }

    heartbeat.abort();
}

async fn record_queue_depth(state: &AppState) {
    if let Ok(depth) = state.queue.depth().await {
        metrics::gauge!("image_queue_depth").set(depth as f64);
    }
}
