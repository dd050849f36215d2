use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::email::{EmailError, Notifier};
use super::inference::{Captioner, ImageGenerator, InferenceError};
use crate::config::EmailProvider;

/// Smallest byte sequence `image::guess_format` recognises as PNG.
pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A captioner for tests. Returns a fixed caption, or a fixed upstream status.
pub struct MockCaptioner {
    reply: Result<String, u16>,
    calls: AtomicUsize,
}

impl MockCaptioner {
    pub fn returning(caption: &str) -> Self {
        Self {
            reply: Ok(caption.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            reply: Err(status),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Captioner for MockCaptioner {
    async fn caption(&self, _image: &[u8]) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Ok(caption) => Ok(caption.clone()),
            Err(status) => Err(InferenceError::Status {
                status: *status,
                body: "mock failure".to_string(),
            }),
        }
    }
}

/// An image generator for tests. Produces a PNG header followed by the prompt.
pub struct MockGenerator {
    fail_with: Option<u16>,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            fail_with: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            fail_with: Some(status),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageGenerator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, InferenceError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(status) = self.fail_with {
            return Err(InferenceError::Status {
                status,
                body: "mock failure".to_string(),
            });
        }
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(prompt.as_bytes());
        Ok(bytes)
    }
}

/// Records every email instead of sending it.
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// `(to, image_url)` pairs, in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn provider(&self) -> EmailProvider {
        EmailProvider::Sendgrid
    }

    async fn send_result(&self, to: &str, image_url: &str) -> Result<(), EmailError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to.to_string(), image_url.to_string()));
        }
        if self.fail {
            return Err(EmailError::Status {
                status: 502,
                body: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}
