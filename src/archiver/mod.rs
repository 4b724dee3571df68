//! Artifact archival
//!
//! Best-effort storage of the image attached to a reading. Backends:
//! - [`LocalArchiver`]: writes into a directory served under `/artifacts`
//! - [`HttpArchiver`]: uploads to a remote content store
//!
//! Every failure is absorbed by [`archive_best_effort`]: the record is
//! persisted without an artifact URL.

pub mod http;
pub mod local;

pub use http::HttpArchiver;
pub use local::LocalArchiver;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ArchiverConfig, ArchiverKind};
use crate::types::{ImageRef, Reading};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("invalid inline image: {0}")]
    InvalidPayload(String),

    #[error("image file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("upload timed out after {0:?}")]
    Timeout(Duration),
}

/// Content store for image artifacts.
#[async_trait]
pub trait ArtifactArchiver: Send + Sync {
    /// Backend name for logs and status.
    fn backend(&self) -> &'static str;

    /// Store the image and return a URL it can be fetched from.
    async fn archive(
        &self,
        unit_id: &str,
        captured_at: DateTime<Utc>,
        image: &ImageRef,
    ) -> Result<String, ArchiveError>;
}

/// Image formats accepted for archival, detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'B', b'M', ..] => Some(Self::Bmp),
            _ => None,
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
        }
    }

    pub fn content_type(self) -> String {
        mime_guess::from_ext(self.extension())
            .first_or_octet_stream()
            .to_string()
    }
}

/// Decoded image ready for storage.
#[derive(Debug, Clone)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl ImageBytes {
    /// Validate size and format.
    pub fn new(bytes: Vec<u8>, max_bytes: usize) -> Result<Self, ArchiveError> {
        if bytes.len() > max_bytes {
            return Err(ArchiveError::TooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }
        let format = ImageFormat::detect(&bytes).ok_or(ArchiveError::UnsupportedFormat)?;
        Ok(Self { bytes, format })
    }

    /// Load an inline or on-disk image. URLs are not loaded here.
    pub async fn load(image: &ImageRef, max_bytes: usize) -> Result<Option<Self>, ArchiveError> {
        match image {
            ImageRef::Base64(data) => {
                // base64 expands 3 bytes to 4 chars
                if data.len() / 4 * 3 > max_bytes.saturating_add(3) {
                    return Err(ArchiveError::TooLarge {
                        size: data.len() / 4 * 3,
                        limit: max_bytes,
                    });
                }
                let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(cleaned.as_bytes())
                    .map_err(|e| ArchiveError::InvalidPayload(e.to_string()))?;
                Self::new(bytes, max_bytes).map(Some)
            }
            ImageRef::Path(path) => Self::read_file(path, max_bytes).await.map(Some),
            ImageRef::Url(_) => Ok(None),
        }
    }

    async fn read_file(path: &Path, max_bytes: usize) -> Result<Self, ArchiveError> {
        let io_err = |source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        };
        let meta = tokio::fs::metadata(path).await.map_err(io_err)?;
        let size = usize::try_from(meta.len()).unwrap_or(usize::MAX);
        if size > max_bytes {
            return Err(ArchiveError::TooLarge { size, limit: max_bytes });
        }
        let bytes = tokio::fs::read(path).await.map_err(io_err)?;
        Self::new(bytes, max_bytes)
    }

    /// Stable public id: unit, capture time and a content hash prefix.
    pub fn public_id(&self, unit_id: &str, captured_at: DateTime<Utc>) -> String {
        let digest = format!("{:x}", md5::compute(&self.bytes));
        format!(
            "{}_{}_{}",
            sanitize_segment(unit_id),
            captured_at.format("%Y%m%dT%H%M%S"),
            &digest[..8]
        )
    }
}

/// Keep only characters safe in file names and URL paths.
pub fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Archive with a timeout, absorbing every failure into `None`.
pub async fn archive_best_effort(
    archiver: &dyn ArtifactArchiver,
    timeout: Duration,
    reading: &Reading,
) -> Option<String> {
    let image = reading.image.as_ref()?;
    let outcome = tokio::time::timeout(
        timeout,
        archiver.archive(&reading.unit_id, reading.captured_at, image),
    )
    .await
    .unwrap_or(Err(ArchiveError::Timeout(timeout)));

    match outcome {
        Ok(url) => {
            tracing::debug!(unit = %reading.unit_id, url = %url, "Artifact archived");
            Some(url)
        }
        Err(e) => {
            tracing::warn!(
                unit = %reading.unit_id,
                backend = archiver.backend(),
                image = %image.describe(),
                error = %e,
                "Artifact archival failed, continuing without URL"
            );
            None
        }
    }
}

/// Build the configured archiver; `None` when archival is disabled.
pub fn from_config(
    config: &ArchiverConfig,
    data_dir: &Path,
) -> Result<Option<Arc<dyn ArtifactArchiver>>, ArchiveError> {
    match config.kind {
        ArchiverKind::Disabled => Ok(None),
        ArchiverKind::Local => Ok(Some(Arc::new(LocalArchiver::new(
            config.local_dir(data_dir),
            &config.folder,
            &config.public_base_url,
            config.max_bytes,
        )))),
        ArchiverKind::Http => {
            let url = config
                .upload_url
                .as_deref()
                .ok_or_else(|| ArchiveError::Upload("archiver.upload_url is not set".to_string()))?;
            Ok(Some(Arc::new(HttpArchiver::new(
                url,
                &config.folder,
                config.max_bytes,
                Duration::from_millis(config.timeout_ms),
            )?)))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_detection() {
        assert_eq!(ImageFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::detect(test_images::PNG), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::detect(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::detect(b"%PDF-1.4"), None);
        assert_eq!(ImageFormat::Png.content_type(), "image/png");
    }

    #[tokio::test]
    async fn test_load_base64_checks_size_and_format() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(test_images::PNG);
        let image = ImageBytes::load(&ImageRef::Base64(b64.clone()), 1024).await.unwrap().unwrap();
        assert_eq!(image.format, ImageFormat::Png);

        assert!(matches!(
            ImageBytes::load(&ImageRef::Base64(b64), 4).await,
            Err(ArchiveError::TooLarge { .. })
        ));

        let pdf = base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4 hello");
        assert!(matches!(
            ImageBytes::load(&ImageRef::Base64(pdf), 1024).await,
            Err(ArchiveError::UnsupportedFormat)
        ));

        assert!(matches!(
            ImageBytes::load(&ImageRef::Base64("***".into()), 1024).await,
            Err(ArchiveError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = ImageBytes::load(&ImageRef::Path("/nonexistent/p.jpg".into()), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }

    #[test]
    fn test_public_id_is_stable() {
        let image = ImageBytes::new(test_images::PNG.to_vec(), 1024).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let id = image.public_id("roof/p 1", at);
        assert!(id.starts_with("roof_p_1_20240501T120000_"));
        assert_eq!(id, image.public_id("roof/p 1", at));
    }
}
