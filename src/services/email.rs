use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::{AppConfig, EmailProvider};

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const MAILGUN_API_BASE: &str = "https://api.mailgun.net/v3";
const SUBJECT: &str = "Your new image is ready";

/// Delivers the finished image link to the submitter.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn provider(&self) -> EmailProvider;

    async fn send_result(&self, to: &str, image_url: &str) -> Result<(), EmailError>;
}

fn body_text(image_url: &str) -> String {
    format!(
        "Your image has been captioned and regenerated.\n\nView the result: {}\n",
        image_url
    )
}

/// Build the notifier selected by `EMAIL_PROVIDER`.
pub fn notifier_from_config(config: &AppConfig) -> Result<Box<dyn Notifier>, EmailError> {
    let timeout = Duration::from_secs(config.http_timeout_secs);

    match config.email_provider {
        EmailProvider::None => Ok(Box::new(DisabledNotifier)),
        EmailProvider::Sendgrid => {
            let api_key = required(&config.email_api_key, "EMAIL_API_KEY")?;
            let from = required(&config.email_from, "EMAIL_FROM")?;
            Ok(Box::new(SendGridNotifier::new(api_key, from, timeout)?))
        }
        EmailProvider::Mailgun => {
            let api_key = required(&config.email_api_key, "EMAIL_API_KEY")?;
            let from = required(&config.email_from, "EMAIL_FROM")?;
            let domain = required(&config.mailgun_domain, "MAILGUN_DOMAIN")?;
            Ok(Box::new(MailgunNotifier::new(
                MAILGUN_API_BASE,
                domain,
                api_key,
                from,
                timeout,
            )?))
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, EmailError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(EmailError::MissingConfig(name))
}

async fn ensure_success(response: reqwest::Response) -> Result<(), EmailError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(EmailError::Status {
        status: status.as_u16(),
        body: body.chars().take(500).collect(),
    })
}

/// Used when no provider is configured; every send is refused.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    fn provider(&self) -> EmailProvider {
        EmailProvider::None
    }

    async fn send_result(&self, _to: &str, _image_url: &str) -> Result<(), EmailError> {
        Err(EmailError::Disabled)
    }
}

pub struct SendGridNotifier {
    http: Client,
    api_key: String,
    from: String,
}

impl SendGridNotifier {
    pub fn new(api_key: &str, from: &str, timeout: Duration) -> Result<Self, EmailError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    fn provider(&self) -> EmailProvider {
        EmailProvider::Sendgrid
    }

    async fn send_result(&self, to: &str, image_url: &str) -> Result<(), EmailError> {
        let payload = serde_json::json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.from },
            "subject": SUBJECT,
            "content": [{ "type": "text/plain", "value": body_text(image_url) }]
        });

        let response = self
            .http
            .post(SENDGRID_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        ensure_success(response).await
    }
}

pub struct MailgunNotifier {
    http: Client,
    messages_url: String,
    api_key: String,
    from: String,
}

impl MailgunNotifier {
    pub fn new(
        api_base: &str,
        domain: &str,
        api_key: &str,
        from: &str,
        timeout: Duration,
    ) -> Result<Self, EmailError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            messages_url: format!("{}/{}/messages", api_base.trim_end_matches('/'), domain),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for MailgunNotifier {
    fn provider(&self) -> EmailProvider {
        EmailProvider::Mailgun
    }

    async fn send_result(&self, to: &str, image_url: &str) -> Result<(), EmailError> {
        let text = body_text(image_url);
        let form = [
            ("from", self.from.as_str()),
            ("to", to),
            ("subject", SUBJECT),
            ("text", text.as_str()),
        ];

        let response = self
            .http
            .post(&self.messages_url)
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await?;

        ensure_success(response).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Email delivery is not configured")]
    Disabled,

    #[error("Missing email configuration: {0}")]
    MissingConfig(&'static str),
}
