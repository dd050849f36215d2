//! Shared harness for in-process tests: the real router and worker wired to
//! in-memory collaborators.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use recaption::app_state::AppState;
use recaption::db::{memory::InMemoryJobStore, JobStore};
use recaption::models::job::NewJob;
use recaption::routes;
use recaption::services::email::{DisabledNotifier, Notifier};
use recaption::services::mock::{MockCaptioner, MockGenerator, RecordingNotifier, PNG_MAGIC};
use recaption::services::queue::{JobQueue, MemoryJobQueue};
use recaption::services::storage::{MemoryObjectStore, ObjectStore};

pub const BOUNDARY: &str = "recaption-test-boundary";
pub const CAPTION: &str = "a cat sitting on a sofa";

pub struct Harness {
    pub state: AppState,
    pub jobs: Arc<InMemoryJobStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub storage: Arc<MemoryObjectStore>,
    pub captioner: Arc<MockCaptioner>,
    pub generator: Arc<MockGenerator>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(
            MockCaptioner::returning(CAPTION),
            MockGenerator::new(),
            RecordingNotifier::new(),
        )
    }

    pub fn with(
        captioner: MockCaptioner,
        generator: MockGenerator,
        notifier: RecordingNotifier,
    ) -> Self {
        let jobs = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let storage = Arc::new(MemoryObjectStore::new());
        let captioner = Arc::new(captioner);
        let generator = Arc::new(generator);
        let notifier = Arc::new(notifier);

        let state = AppState::new(
            jobs.clone(),
            queue.clone(),
            storage.clone(),
            captioner.clone(),
            generator.clone(),
            notifier.clone(),
            reqwest::Client::new(),
        );

        Self {
            state,
            jobs,
            queue,
            storage,
            captioner,
            generator,
            notifier,
        }
    }

    /// Same collaborators, but with email delivery switched off.
    pub fn without_email(&self) -> AppState {
        let notifier: Arc<dyn Notifier> = Arc::new(DisabledNotifier);
        AppState {
            notifier,
            ..self.state.clone()
        }
    }

    /// State for another worker process sharing the same queue, store and
    /// collaborators, with its own consumer identity.
    pub fn another_worker(&self) -> (Arc<MemoryJobQueue>, AppState) {
        let queue = Arc::new(self.queue.consumer());
        let handle: Arc<dyn JobQueue> = queue.clone();
        let state = AppState {
            queue: handle,
            ..self.state.clone()
        };
        (queue, state)
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone(), 10 * 1024 * 1024)
    }

    /// Put a job into the system the way the upload endpoint does, without HTTP.
    pub async fn submit(&self, email: &str) -> Uuid {
        let key = format!("images/{}/cat.png", Uuid::new_v4());
        self.storage
            .upload(&key, &png_bytes(5 * 1024), "image/png")
            .await
            .unwrap();
        let job = self
            .jobs
            .create(NewJob {
                email: email.to_string(),
                source_image_ref: key,
            })
            .await
            .unwrap();
        self.queue.publish(job.id).await.unwrap();
        job.id
    }
}

/// A buffer `image::guess_format` accepts as PNG, padded to `size` bytes.
pub fn png_bytes(size: usize) -> Vec<u8> {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.resize(size.max(PNG_MAGIC.len()), 0);
    bytes
}

/// Build a multipart body. `file` is `(field name, file name, bytes)`.
pub fn multipart_body(email: Option<&str>, file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();

    if let Some(email) = email {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"email\"\r\n\r\n{email}\r\n"
            )
            .as_bytes(),
        );
    }

    if let Some((field, file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn json_request(uri: &str, value: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Run one request through the router and decode the JSON reply.
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Upload a 5KB PNG for `email` and return the request id.
pub async fn upload(router: Router, email: &str) -> String {
    let body = multipart_body(Some(email), Some(("image", "cat.png", &png_bytes(5 * 1024))));
    let (status, body) = send(router, upload_request(body)).await;
    assert_eq!(status, StatusCode::OK, "upload failed: {body}");
    body["request_id"].as_str().unwrap().to_string()
}
