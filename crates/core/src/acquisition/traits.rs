use std::path::Path;

use async_trait::async_trait;

use super::{AcquisitionError, ContentItem, DownloadedFile, RemoteMetadata};
use crate::reference::{ChatLink, ExternalLink};

/// Client for the chat platform.
///
/// One authenticated session is shared per job or per batch run. The owner
/// calls [`connect`](ChatSource::connect) once and must call
/// [`disconnect`](ChatSource::disconnect) on every exit path.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), AcquisitionError>;

    async fn disconnect(&self);

    /// Fetch one post. Missing posts are [`AcquisitionError::NotFound`].
    async fn fetch_item(&self, link: &ChatLink) -> Result<ContentItem, AcquisitionError>;

    /// All posts of the album `item` belongs to, sorted by id.
    ///
    /// Posts outside an album resolve to themselves.
    async fn fetch_album(
        &self,
        link: &ChatLink,
        item: &ContentItem,
    ) -> Result<Vec<ContentItem>, AcquisitionError> {
        let _ = link;
        Ok(vec![item.clone()])
    }

    /// Download one attachment of `item` to exactly `dest`.
    async fn download(
        &self,
        item: &ContentItem,
        attachment_index: usize,
        dest: &Path,
    ) -> Result<DownloadedFile, AcquisitionError>;
}

/// Client for videos hosted outside the chat platform.
#[async_trait]
pub trait ExternalSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_metadata(&self, link: &ExternalLink) -> Result<RemoteMetadata, AcquisitionError>;

    /// Download the video (and thumbnail, if any) into `dest_dir`.
    async fn download(
        &self,
        link: &ExternalLink,
        dest_dir: &Path,
    ) -> Result<Vec<DownloadedFile>, AcquisitionError>;
}
