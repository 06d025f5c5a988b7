//! Mock chat backend for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::acquisition::{AcquisitionError, ChatSource, ContentItem, DownloadedFile};
use crate::reference::ChatLink;

/// Bytes written for attachments without a declared size.
const DEFAULT_PAYLOAD_LEN: usize = 16;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChatCallCounts {
    pub connect: usize,
    pub disconnect: usize,
    pub fetch: usize,
    pub download: usize,
}

/// In-memory chat platform.
///
/// Posts are keyed by channel directory name and message id. Failures are
/// scripted per operation and consumed in order.
///
/// # Example
///
/// ```rust,ignore
/// let chat = MockChatSource::new();
/// chat.add_item("somechan", fixtures::post(12, Some("hi"), vec![])).await;
/// chat.push_fetch_error(AcquisitionError::Connection("reset".into())).await;
/// ```
#[derive(Debug, Default)]
pub struct MockChatSource {
    items: Arc<RwLock<HashMap<(String, i64), ContentItem>>>,
    connect_errors: Arc<RwLock<VecDeque<AcquisitionError>>>,
    fetch_errors: Arc<RwLock<VecDeque<AcquisitionError>>>,
    download_errors: Arc<RwLock<VecDeque<AcquisitionError>>>,
    counts: Arc<RwLock<ChatCallCounts>>,
}

impl MockChatSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `item` in the channel whose directory name is `channel`.
    pub async fn add_item(&self, channel: &str, item: ContentItem) {
        self.items
            .write()
            .await
            .insert((channel.to_string(), item.id), item);
    }

    pub async fn push_connect_error(&self, error: AcquisitionError) {
        self.connect_errors.write().await.push_back(error);
    }

    pub async fn push_fetch_error(&self, error: AcquisitionError) {
        self.fetch_errors.write().await.push_back(error);
    }

    pub async fn push_download_error(&self, error: AcquisitionError) {
        self.download_errors.write().await.push_back(error);
    }

    pub async fn counts(&self) -> ChatCallCounts {
        *self.counts.read().await
    }

    pub async fn fetch_count(&self) -> usize {
        self.counts.read().await.fetch
    }

    pub async fn download_count(&self) -> usize {
        self.counts.read().await.download
    }

    async fn lookup(&self, link: &ChatLink) -> Result<ContentItem, AcquisitionError> {
        self.items
            .read()
            .await
            .get(&(link.channel.dir_name(), link.message_id))
            .cloned()
            .ok_or_else(|| AcquisitionError::NotFound(link.canonical_url()))
    }
}

#[async_trait]
impl ChatSource for MockChatSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<(), AcquisitionError> {
        self.counts.write().await.connect += 1;
        match self.connect_errors.write().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) {
        self.counts.write().await.disconnect += 1;
    }

    async fn fetch_item(&self, link: &ChatLink) -> Result<ContentItem, AcquisitionError> {
        self.counts.write().await.fetch += 1;
        if let Some(err) = self.fetch_errors.write().await.pop_front() {
            return Err(err);
        }
        self.lookup(link).await
    }

    async fn fetch_album(
        &self,
        link: &ChatLink,
        item: &ContentItem,
    ) -> Result<Vec<ContentItem>, AcquisitionError> {
        let Some(group) = item.grouped_id else {
            return Ok(vec![item.clone()]);
        };
        let channel = link.channel.dir_name();
        let mut album: Vec<ContentItem> = self
            .items
            .read()
            .await
            .iter()
            .filter(|((c, _), i)| *c == channel && i.grouped_id == Some(group))
            .map(|(_, i)| i.clone())
            .collect();
        album.sort_by_key(|i| i.id);
        Ok(album)
    }

    async fn download(
        &self,
        item: &ContentItem,
        attachment_index: usize,
        dest: &Path,
    ) -> Result<DownloadedFile, AcquisitionError> {
        self.counts.write().await.download += 1;
        if let Some(err) = self.download_errors.write().await.pop_front() {
            return Err(err);
        }

        let attachment = item.attachments.get(attachment_index).ok_or_else(|| {
            AcquisitionError::NotFound(format!(
                "post {} has no attachment {}",
                item.id, attachment_index
            ))
        })?;

        let len = attachment
            .size_bytes
            .map(|s| s as usize)
            .unwrap_or(DEFAULT_PAYLOAD_LEN);
        let seed = format!("{}:{}:", item.id, attachment_index).into_bytes();
        let bytes: Vec<u8> = seed.iter().copied().cycle().take(len).collect();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;

        Ok(DownloadedFile {
            path: dest.to_path_buf(),
            kind: attachment.kind,
            mime_type: attachment.mime_type.clone(),
            duration_secs: attachment.duration_secs,
            size_bytes: bytes.len() as u64,
        })
    }
}
