//! Multipart upload boundary.
//!
//! One HTTP POST per capture: the encoded image travels as a single
//! multipart/form-data file field, with configurable static text fields
//! beside it and opaque headers (API keys, workspace ids) passed through
//! verbatim. Success is any 2xx; everything else is reported to the caller
//! and never retried.

use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use thiserror::Error;

use crate::config::UploadSettings;

/// Fixed per-request timeout.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

const IMAGE_MIME: &str = "image/webp";

/// Network, timeout, or non-2xx upload failure. Never affects the local
/// save, which happens first and independently.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A 2xx response: status plus whatever body the endpoint returned.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub status: u16,
    pub body: String,
}

/// Blocking multipart upload client for one configured endpoint.
pub struct Uploader {
    client: Client,
    settings: UploadSettings,
}

impl Uploader {
    pub fn new(settings: UploadSettings) -> Result<Self, UploadError> {
        Self::with_timeout(settings, UPLOAD_TIMEOUT)
    }

    pub(crate) fn with_timeout(
        settings: UploadSettings,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, settings })
    }

    pub fn endpoint(&self) -> &str {
        &self.settings.url
    }

    /// POST one encoded capture. Blocks up to the fixed timeout.
    pub fn send(&self, filename: &str, image: &[u8]) -> Result<UploadReceipt, UploadError> {
        let part = multipart::Part::bytes(image.to_vec())
            .file_name(filename.to_string())
            .mime_str(IMAGE_MIME)?;
        let mut form = multipart::Form::new().part(self.settings.image_field.clone(), part);
        for (key, value) in &self.settings.metadata {
            form = form.text(key.clone(), value.clone());
        }

        let mut request = self.client.post(&self.settings.url).multipart(form);
        for (key, value) in &self.settings.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        log::info!("uploading {} to {}", filename, self.settings.url);
        let response = request.send()?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        if status.is_success() {
            Ok(UploadReceipt {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
