//! Mock external video host for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::acquisition::{AcquisitionError, DownloadedFile, ExternalSource, RemoteMetadata};
use crate::job::MediaKind;
use crate::reference::ExternalLink;

/// Records every call and writes a fake video (plus thumbnail) on download.
#[derive(Debug)]
pub struct MockExternalSource {
    metadata: Arc<RwLock<RemoteMetadata>>,
    video_bytes: Arc<RwLock<usize>>,
    with_thumbnail: Arc<RwLock<bool>>,
    metadata_errors: Arc<RwLock<VecDeque<AcquisitionError>>>,
    download_errors: Arc<RwLock<VecDeque<AcquisitionError>>>,
    metadata_calls: Arc<RwLock<Vec<String>>>,
    download_calls: Arc<RwLock<Vec<String>>>,
}

impl Default for MockExternalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExternalSource {
    pub fn new() -> Self {
        Self {
            metadata: Arc::new(RwLock::new(RemoteMetadata {
                title: Some("Mock video".to_string()),
                uploader: Some("mock uploader".to_string()),
                upload_date: Some("20240101".to_string()),
                duration_secs: Some(60.0),
                filesize_bytes: Some(1024),
                description: Some("A video used in tests.".to_string()),
                webpage_url: None,
            })),
            video_bytes: Arc::new(RwLock::new(1024)),
            with_thumbnail: Arc::new(RwLock::new(true)),
            metadata_errors: Arc::new(RwLock::new(VecDeque::new())),
            download_errors: Arc::new(RwLock::new(VecDeque::new())),
            metadata_calls: Arc::new(RwLock::new(Vec::new())),
            download_calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_metadata(&self, metadata: RemoteMetadata) {
        *self.metadata.write().await = metadata;
    }

    pub async fn set_video_bytes(&self, len: usize) {
        *self.video_bytes.write().await = len;
    }

    pub async fn set_with_thumbnail(&self, enabled: bool) {
        *self.with_thumbnail.write().await = enabled;
    }

    pub async fn push_metadata_error(&self, error: AcquisitionError) {
        self.metadata_errors.write().await.push_back(error);
    }

    pub async fn push_download_error(&self, error: AcquisitionError) {
        self.download_errors.write().await.push_back(error);
    }

    /// Video ids passed to `fetch_metadata`, in call order.
    pub async fn metadata_calls(&self) -> Vec<String> {
        self.metadata_calls.read().await.clone()
    }

    pub async fn download_count(&self) -> usize {
        self.download_calls.read().await.len()
    }

    /// Metadata plus download calls.
    pub async fn total_calls(&self) -> usize {
        self.metadata_calls.read().await.len() + self.download_calls.read().await.len()
    }
}

#[async_trait]
impl ExternalSource for MockExternalSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_metadata(&self, link: &ExternalLink) -> Result<RemoteMetadata, AcquisitionError> {
        self.metadata_calls.write().await.push(link.video_id.clone());
        if let Some(err) = self.metadata_errors.write().await.pop_front() {
            return Err(err);
        }
        let mut metadata = self.metadata.read().await.clone();
        if metadata.webpage_url.is_none() {
            metadata.webpage_url = Some(link.url.clone());
        }
        Ok(metadata)
    }

    async fn download(
        &self,
        link: &ExternalLink,
        dest_dir: &Path,
    ) -> Result<Vec<DownloadedFile>, AcquisitionError> {
        self.download_calls.write().await.push(link.video_id.clone());
        if let Some(err) = self.download_errors.write().await.pop_front() {
            return Err(err);
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let len = *self.video_bytes.read().await;
        let video: Vec<u8> = link.video_id.bytes().cycle().take(len).collect();
        let video_path = dest_dir.join(format!("{}.mp4", link.video_id));
        tokio::fs::write(&video_path, &video).await?;

        let mut files = vec![DownloadedFile {
            path: video_path,
            kind: MediaKind::Video,
            mime_type: Some("video/mp4".to_string()),
            duration_secs: self.metadata.read().await.duration_secs,
            size_bytes: video.len() as u64,
        }];

        if *self.with_thumbnail.read().await {
            let thumb_path = dest_dir.join(format!("{}.jpg", link.video_id));
            tokio::fs::write(&thumb_path, b"\xFF\xD8\xFFthumb").await?;
            files.push(DownloadedFile {
                path: thumb_path,
                kind: MediaKind::Image,
                mime_type: Some("image/jpeg".to_string()),
                duration_secs: None,
                size_bytes: 8,
            });
        }

        Ok(files)
    }
}
