use serde::Deserialize;
use strum::Display;

/// Which email API delivers finished results.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EmailProvider {
    None,
    Sendgrid,
    Mailgun,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Name of the Redis list carrying job ids
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Public base URL for stored objects. Defaults to `{r2_endpoint}/{r2_bucket}`.
    #[serde(default)]
    pub storage_public_url: Option<String>,

    /// Hugging Face Inference API token
    pub hf_api_token: String,

    #[serde(default = "default_hf_api_base")]
    pub hf_api_base: String,

    #[serde(default = "default_caption_model")]
    pub caption_model: String,

    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    #[serde(default = "default_email_provider")]
    pub email_provider: EmailProvider,

    #[serde(default)]
    pub email_api_key: Option<String>,

    /// Sender address used for result notifications
    #[serde(default)]
    pub email_from: Option<String>,

    /// Sending domain, Mailgun only
    #[serde(default)]
    pub mailgun_domain: Option<String>,

    /// Timeout applied to every outbound call
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Address for the worker's Prometheus listener (e.g., "0.0.0.0:9100").
    /// The worker exports no metrics when unset.
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_queue_name() -> String {
    "image_tasks".to_string()
}

fn default_hf_api_base() -> String {
    "https://api-inference.huggingface.co".to_string()
}

fn default_caption_model() -> String {
    "Salesforce/blip-image-captioning-large".to_string()
}

fn default_generation_model() -> String {
    "kothariyashhh/GenAi-Texttoimage".to_string()
}

fn default_email_provider() -> EmailProvider {
    EmailProvider::None
}

fn default_http_timeout_secs() -> u64 {
    60
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn public_base_url(&self) -> String {
        match &self.storage_public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "{}/{}",
                self.r2_endpoint.trim_end_matches('/'),
                self.r2_bucket
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required_vars() -> Vec<(String, String)> {
        [
            ("DATABASE_URL", "postgres://localhost/recaption"),
            ("REDIS_URL", "redis://localhost"),
            ("R2_BUCKET", "images"),
            ("R2_ACCESS_KEY", "key"),
            ("R2_SECRET_KEY", "secret"),
            ("R2_ENDPOINT", "https://example.r2.cloudflarestorage.com/"),
            ("HF_API_TOKEN", "hf_token"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = envy::from_iter(required_vars()).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.queue_name, "image_tasks");
        assert_eq!(config.email_provider, EmailProvider::None);
        assert_eq!(config.caption_model, "Salesforce/blip-image-captioning-large");
        assert_eq!(config.http_timeout_secs, 60);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(
            config.public_base_url(),
            "https://example.r2.cloudflarestorage.com/images"
        );
    }

    #[test]
    fn test_email_provider_and_public_url() {
        let mut vars = required_vars();
        vars.push(("EMAIL_PROVIDER".into(), "mailgun".into()));
        vars.push(("STORAGE_PUBLIC_URL".into(), "https://cdn.example.com/".into()));

        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert_eq!(config.email_provider, EmailProvider::Mailgun);
        assert_eq!(config.public_base_url(), "https://cdn.example.com");
    }

    #[test]
    fn test_missing_required_var() {
        let vars: Vec<_> = required_vars()
            .into_iter()
            .filter(|(k, _)| k != "DATABASE_URL")
            .collect();
        assert!(envy::from_iter::<_, AppConfig>(vars).is_err());
    }
}
