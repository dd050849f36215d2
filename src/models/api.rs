use garde::Validate;
use serde::{Deserialize, Serialize};

/// Text fields of the multipart upload form.
#[derive(Debug, Validate)]
pub struct UploadForm {
    #[garde(email)]
    pub email: String,
}

/// Response after an image was accepted for processing.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub request_id: String,
}

/// Response for polling a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub caption: Option<String>,
    pub new_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CaptionRequest {
    #[garde(length(min = 1))]
    pub image_url: String,
    #[garde(skip)]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptionResponse {
    pub caption: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateImageRequest {
    #[garde(length(min = 1, max = 2000))]
    pub caption: String,
    #[garde(skip)]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateImageResponse {
    pub image_url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendEmailRequest {
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 1))]
    pub image_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}
