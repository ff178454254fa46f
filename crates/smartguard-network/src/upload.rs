use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use smartguard_types::{report::UploadTarget, Result, SmartguardError};
use tracing::debug;

/// Transfers encoded frame bytes to one upload target.
#[async_trait]
pub trait FrameUploader: Send + Sync {
    async fn upload(&self, target: &UploadTarget, jpeg: &[u8]) -> Result<()>;
}

/// Multipart POST uploader for presigned form targets: every grant field
/// becomes a text part and the frame is sent last as `file`.
#[derive(Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
}

impl HttpUploader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| upload_error(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }
}

pub(crate) fn multipart_form(target: &UploadTarget, jpeg: &[u8]) -> Result<Form> {
    let mut form = Form::new();
    for (name, value) in &target.fields {
        form = form.text(name.clone(), value.clone());
    }
    let file = Part::bytes(jpeg.to_vec())
        .file_name(target.file_name().to_string())
        .mime_str("image/jpeg")
        .map_err(|err| upload_error(format!("invalid mime type: {err}")))?;
    Ok(form.part("file", file))
}

#[async_trait]
impl FrameUploader for HttpUploader {
    async fn upload(&self, target: &UploadTarget, jpeg: &[u8]) -> Result<()> {
        let form = multipart_form(target, jpeg)?;
        let response = self
            .client
            .post(&target.url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| upload_error(format!("{}: request failed: {err}", target.name)))?;

        let status = response.status();
        if status.is_success() {
            debug!(target = %target.name, %status, bytes = jpeg.len(), "uploaded frame");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(upload_error(format!(
                "{}: upload rejected with {status}: {body}",
                target.name
            )))
        }
    }
}

fn upload_error(message: impl Into<String>) -> SmartguardError {
    SmartguardError::Upload(message.into())
}
