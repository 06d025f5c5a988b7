//! Acquisition backends: the chat platform and external video hosts.

mod error;
mod traits;
mod types;
mod ytdlp;

pub use error::AcquisitionError;
pub use traits::{ChatSource, ExternalSource};
pub use types::{
    extension_for_mime, media_kind_for_path, mime_for_path, Attachment, ContentItem,
    DownloadedFile, ForwardInfo, RemoteMetadata,
};
pub use ytdlp::YtDlpSource;
