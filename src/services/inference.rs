use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::Deserialize;
use std::time::Duration;

/// Turns an image into a one-line description.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, image: &[u8]) -> Result<String, InferenceError>;
}

/// Produces image bytes from a text prompt.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, InferenceError>;
}

/// Client for the Hugging Face Inference API.
pub struct HuggingFaceClient {
    http: Client,
    api_base: String,
    api_token: String,
    caption_model: String,
    generation_model: String,
}

#[derive(Deserialize)]
struct CaptionCandidate {
    generated_text: String,
}

impl HuggingFaceClient {
    pub fn new(
        api_base: &str,
        api_token: &str,
        caption_model: &str,
        generation_model: &str,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(InferenceError::Http)?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            caption_model: caption_model.to_string(),
            generation_model: generation_model.to_string(),
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/models/{}", self.api_base, model)
    }
}

async fn ensure_success(response: Response) -> Result<Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InferenceError::Status {
        status: status.as_u16(),
        body: body.chars().take(500).collect(),
    })
}

/// Pull the caption out of the `[{"generated_text": ...}]` response shape.
fn parse_caption(body: &[u8]) -> Result<String, InferenceError> {
    let candidates: Vec<CaptionCandidate> = serde_json::from_slice(body)?;
    candidates
        .into_iter()
        .map(|c| c.generated_text.trim().to_string())
        .find(|text| !text.is_empty())
        .ok_or_else(|| InferenceError::Unexpected("no caption in response".to_string()))
}

#[async_trait]
impl Captioner for HuggingFaceClient {
    async fn caption(&self, image: &[u8]) -> Result<String, InferenceError> {
        let content_type = image::guess_format(image)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");

        let response = self
            .http
            .post(self.model_url(&self.caption_model))
            .bearer_auth(&self.api_token)
            .header(header::CONTENT_TYPE, content_type)
            .body(image.to_vec())
            .send()
            .await
            .map_err(InferenceError::Http)?;

        let body = ensure_success(response).await?.bytes().await?;
        parse_caption(&body)
    }
}

#[async_trait]
impl ImageGenerator for HuggingFaceClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, InferenceError> {
        let response = self
            .http
            .post(self.model_url(&self.generation_model))
            .bearer_auth(&self.api_token)
            .header(header::ACCEPT, "image/png")
            .json(&serde_json::json!({ "inputs": prompt }))
            .send()
            .await
            .map_err(InferenceError::Http)?;

        let bytes = ensure_success(response).await?.bytes().await?;

        // The API answers 200 with a JSON body while a model is still loading.
        image::guess_format(&bytes).map_err(|_| {
            InferenceError::Unexpected(format!(
                "generation returned non-image body: {}",
                String::from_utf8_lossy(&bytes[..bytes.len().min(200)])
            ))
        })?;

        Ok(bytes.to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse inference response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unexpected inference response: {0}")]
    Unexpected(String),
}
