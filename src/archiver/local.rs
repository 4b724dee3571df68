//! Local directory archiver
//!
//! Writes `<dir>/<folder>/<public_id>.<ext>` and returns
//! `<public_base_url>/<folder>/<public_id>.<ext>`. The HTTP server serves
//! `<dir>` under `/artifacts`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use super::{sanitize_segment, ArchiveError, ArtifactArchiver, ImageBytes};
use crate::types::ImageRef;

#[derive(Debug, Clone)]
pub struct LocalArchiver {
    root: PathBuf,
    folder: String,
    public_base_url: String,
    max_bytes: usize,
}

impl LocalArchiver {
    pub fn new(root: PathBuf, folder: &str, public_base_url: &str, max_bytes: usize) -> Self {
        Self {
            root,
            folder: sanitize_segment(folder),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    /// Directory served under `/artifacts`.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl ArtifactArchiver for LocalArchiver {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn archive(
        &self,
        unit_id: &str,
        captured_at: DateTime<Utc>,
        image: &ImageRef,
    ) -> Result<String, ArchiveError> {
        let Some(image_bytes) = ImageBytes::load(image, self.max_bytes).await? else {
            // Remote URLs are already retrievable
            if let ImageRef::Url(url) = image {
                return Ok(url.clone());
            }
            return Err(ArchiveError::UnsupportedFormat);
        };

        let dir = self.root.join(&self.folder);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ArchiveError::Io { path: dir.clone(), source })?;

        let file_name = format!(
            "{}.{}",
            image_bytes.public_id(unit_id, captured_at),
            image_bytes.format.extension()
        );
        let path = dir.join(&file_name);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &image_bytes.bytes)
            .await
            .map_err(|source| ArchiveError::Io { path: tmp.clone(), source })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| ArchiveError::Io { path: path.clone(), source })?;

        Ok(format!("{}/{}/{}", self.public_base_url, self.folder, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::test_images::PNG;
    use base64::Engine;

    #[tokio::test]
    async fn test_archives_inline_image() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = LocalArchiver::new(dir.path().to_path_buf(), "solar_panels", "/artifacts/", 1024);
        let b64 = base64::engine::general_purpose::STANDARD.encode(PNG);

        let url = archiver
            .archive("panel1", Utc::now(), &ImageRef::Base64(b64))
            .await
            .unwrap();
        assert!(url.starts_with("/artifacts/solar_panels/panel1_"));
        assert!(url.ends_with(".png"));

        let file = url.trim_start_matches("/artifacts/");
        assert_eq!(std::fs::read(dir.path().join(file)).unwrap(), PNG);
    }

    #[tokio::test]
    async fn test_url_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = LocalArchiver::new(dir.path().to_path_buf(), "f", "/artifacts", 1024);
        let url = archiver
            .archive("p", Utc::now(), &ImageRef::Url("https://cdn.example.com/x.jpg".into()))
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/x.jpg");
    }

    #[tokio::test]
    async fn test_oversized_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        std::fs::write(&path, [PNG, &[0u8; 64][..]].concat()).unwrap();
        let archiver = LocalArchiver::new(dir.path().join("out"), "f", "/artifacts", 16);
        let err = archiver.archive("p", Utc::now(), &ImageRef::Path(path)).await.unwrap_err();
        assert!(matches!(err, ArchiveError::TooLarge { .. }));
    }
}
