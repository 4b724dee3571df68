//! Remote content store archiver
//!
//! Uploads as JSON: `{public_id, folder, content_type, file}` where `file` is
//! a `data:` URI for local images or the source URL for remote ones (the
//! store fetches by reference). The store answers with `secure_url` or `url`.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{sanitize_segment, ArchiveError, ArtifactArchiver, ImageBytes};
use crate::types::ImageRef;

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    public_id: String,
    folder: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    file: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    secure_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpArchiver {
    http: reqwest::Client,
    upload_url: String,
    folder: String,
    max_bytes: usize,
}

impl HttpArchiver {
    pub fn new(
        upload_url: &str,
        folder: &str,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<Self, ArchiveError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArchiveError::Upload(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            upload_url: upload_url.to_string(),
            folder: sanitize_segment(folder),
            max_bytes,
        })
    }

    fn request(
        &self,
        unit_id: &str,
        captured_at: DateTime<Utc>,
        image: &ImageRef,
        loaded: Option<ImageBytes>,
    ) -> Result<UploadRequest<'_>, ArchiveError> {
        match (loaded, image) {
            (Some(bytes), _) => {
                let content_type = bytes.format.content_type();
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes.bytes);
                Ok(UploadRequest {
                    public_id: bytes.public_id(unit_id, captured_at),
                    folder: &self.folder,
                    file: format!("data:{content_type};base64,{encoded}"),
                    content_type: Some(content_type),
                })
            }
            (None, ImageRef::Url(url)) => Ok(UploadRequest {
                public_id: format!(
                    "{}_{}",
                    sanitize_segment(unit_id),
                    captured_at.format("%Y%m%dT%H%M%S")
                ),
                folder: &self.folder,
                content_type: None,
                file: url.clone(),
            }),
            (None, _) => Err(ArchiveError::UnsupportedFormat),
        }
    }
}

#[async_trait]
impl ArtifactArchiver for HttpArchiver {
    fn backend(&self) -> &'static str {
        "http"
    }

    async fn archive(
        &self,
        unit_id: &str,
        captured_at: DateTime<Utc>,
        image: &ImageRef,
    ) -> Result<String, ArchiveError> {
        let loaded = ImageBytes::load(image, self.max_bytes).await?;
        let body = self.request(unit_id, captured_at, image, loaded)?;

        let response = self
            .http
            .post(&self.upload_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ArchiveError::Upload(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Upload(format!("store returned {status}")));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::Upload(format!("bad store response: {e}")))?;
        parsed
            .secure_url
            .or(parsed.url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ArchiveError::Upload("store response has no URL".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::test_images::PNG;

    fn archiver() -> HttpArchiver {
        HttpArchiver::new("http://127.0.0.1:9/upload", "solar panels", 1024, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_inline_request_body() {
        let archiver = archiver();
        let bytes = ImageBytes::new(PNG.to_vec(), 1024).unwrap();
        let body = archiver
            .request("p1", Utc::now(), &ImageRef::Base64(String::new()), Some(bytes))
            .unwrap();
        assert_eq!(body.folder, "solar_panels");
        assert_eq!(body.content_type.as_deref(), Some("image/png"));
        assert!(body.file.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_url_request_body() {
        let archiver = archiver();
        let body = archiver
            .request("p1", Utc::now(), &ImageRef::Url("https://x/y.jpg".into()), None)
            .unwrap();
        assert_eq!(body.file, "https://x/y.jpg");
        assert!(body.public_id.starts_with("p1_"));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_upload_error() {
        let archiver = archiver();
        let err = archiver
            .archive("p1", Utc::now(), &ImageRef::Url("https://x/y.jpg".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Upload(_)));
    }
}
