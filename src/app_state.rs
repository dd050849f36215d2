use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::db::{queries::PgJobStore, JobStore};
use crate::services::{
    email::{self, Notifier},
    inference::{Captioner, HuggingFaceClient, ImageGenerator},
    queue::{JobQueue, RedisJobQueue},
    storage::{ObjectStore, R2Client},
};

const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state passed to all route handlers and the worker.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub storage: Arc<dyn ObjectStore>,
    pub captioner: Arc<dyn Captioner>,
    pub generator: Arc<dyn ImageGenerator>,
    pub notifier: Arc<dyn Notifier>,
    /// Client for fetching images from URLs outside the object store.
    pub http: reqwest::Client,
    /// Largest image accepted from an external URL.
    pub max_image_bytes: usize,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        storage: Arc<dyn ObjectStore>,
        captioner: Arc<dyn Captioner>,
        generator: Arc<dyn ImageGenerator>,
        notifier: Arc<dyn Notifier>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            jobs,
            queue,
            storage,
            captioner,
            generator,
            notifier,
            http,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    /// Connect every production collaborator described by `config`.
    pub fn from_config(config: &AppConfig, pool: PgPool) -> Result<Self, Box<dyn std::error::Error>> {
        let timeout = Duration::from_secs(config.http_timeout_secs);

        tracing::info!("Initializing R2 storage client");
        let storage = R2Client::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
            &config.public_base_url(),
            timeout,
        )?;

        tracing::info!(queue = %config.queue_name, "Connecting to Redis job queue");
        let queue = RedisJobQueue::new(&config.redis_url, &config.queue_name)?;

        tracing::info!(
            caption_model = %config.caption_model,
            generation_model = %config.generation_model,
            "Initializing Hugging Face inference client"
        );
        let inference = Arc::new(HuggingFaceClient::new(
            &config.hf_api_base,
            &config.hf_api_token,
            &config.caption_model,
            &config.generation_model,
            timeout,
        )?);

        tracing::info!(provider = %config.email_provider, "Initializing email notifier");
        let notifier: Arc<dyn Notifier> = email::notifier_from_config(config)?.into();

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self::new(
            Arc::new(PgJobStore::new(pool)),
            Arc::new(queue),
            Arc::new(storage),
            inference.clone(),
            inference,
            notifier,
            http,
        )
        .with_max_image_bytes(config.max_upload_bytes))
    }
}
