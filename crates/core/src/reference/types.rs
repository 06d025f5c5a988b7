use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ChatKindPolicy;
use crate::job::JobKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("empty reference")]
    Empty,

    #[error("not a link: {0:?}")]
    NotALink(String),

    #[error("invalid chat link {url:?}: {reason}")]
    InvalidChatLink { url: String, reason: String },

    #[error("reserved chat path in {0:?}")]
    ReservedPath(String),
}

/// Channel a chat post lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ChannelRef {
    /// Public channel addressed by username.
    Public(String),
    /// Private channel addressed by its internal numeric id.
    Private(i64),
}

impl ChannelRef {
    /// Directory name used for this channel in the artifact tree.
    pub fn dir_name(&self) -> String {
        match self {
            ChannelRef::Public(username) => username.clone(),
            ChannelRef::Private(id) => id.to_string(),
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            ChannelRef::Public(username) => Some(username),
            ChannelRef::Private(_) => None,
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Public(username) => write!(f, "@{}", username),
            ChannelRef::Private(id) => write!(f, "c/{}", id),
        }
    }
}

/// A single chat post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatLink {
    pub channel: ChannelRef,
    pub message_id: i64,
}

impl ChatLink {
    pub fn canonical_url(&self) -> String {
        match &self.channel {
            ChannelRef::Public(username) => format!("https://t.me/{}/{}", username, self.message_id),
            ChannelRef::Private(id) => format!("https://t.me/c/{}/{}", id, self.message_id),
        }
    }
}

/// Hosting site of an external video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoHost {
    Youtube,
    X,
    Vk,
    Rutube,
    Other,
}

impl VideoHost {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoHost::Youtube => "youtube",
            VideoHost::X => "x",
            VideoHost::Vk => "vk",
            VideoHost::Rutube => "rutube",
            VideoHost::Other => "other",
        }
    }
}

impl fmt::Display for VideoHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalLink {
    pub host: VideoHost,
    /// Host-specific id, safe to use as a directory name.
    pub video_id: String,
    /// The URL as submitted (trimmed).
    pub url: String,
}

/// A parsed content reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reference {
    Chat(ChatLink),
    External(ExternalLink),
}

impl Reference {
    /// Unique key for the job store. Equivalent URLs of one chat post map to one key.
    pub fn identity_key(&self) -> String {
        match self {
            Reference::Chat(link) => link.canonical_url(),
            Reference::External(link) => link.url.clone(),
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, Reference::Chat(_))
    }

    pub fn as_chat(&self) -> Option<&ChatLink> {
        match self {
            Reference::Chat(link) => Some(link),
            Reference::External(_) => None,
        }
    }

    pub fn as_external(&self) -> Option<&ExternalLink> {
        match self {
            Reference::External(link) => Some(link),
            Reference::Chat(_) => None,
        }
    }

    /// Kind a fresh job for this reference starts with.
    pub fn initial_kind(&self, policy: ChatKindPolicy) -> JobKind {
        match self {
            Reference::Chat(_) => policy.initial_kind(),
            Reference::External(_) => JobKind::External,
        }
    }

    /// Deterministic artifact directory for this reference under `root`.
    ///
    /// Depends only on reference identity and job kind, never on time.
    pub fn output_dir(&self, kind: JobKind, root: &Path) -> PathBuf {
        match self {
            Reference::External(link) => root
                .join("collected")
                .join("external")
                .join(link.host.as_str())
                .join(&link.video_id),
            Reference::Chat(link) => {
                let area = match kind {
                    JobKind::Media => "media",
                    JobKind::Ingest => "wiki",
                    JobKind::Collect | JobKind::External | JobKind::Undetermined => "collected",
                };
                root.join(area)
                    .join(link.channel.dir_name())
                    .join(link.message_id.to_string())
            }
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(channel: ChannelRef, message_id: i64) -> Reference {
        Reference::Chat(ChatLink {
            channel,
            message_id,
        })
    }

    #[test]
    fn test_identity_key_canonical() {
        let public = chat(ChannelRef::Public("durov".to_string()), 42);
        assert_eq!(public.identity_key(), "https://t.me/durov/42");

        let private = chat(ChannelRef::Private(1775135187), 1197);
        assert_eq!(private.identity_key(), "https://t.me/c/1775135187/1197");
    }

    #[test]
    fn test_output_dir_per_kind() {
        let root = Path::new("/out");
        let reference = chat(ChannelRef::Public("chan".to_string()), 7);

        assert_eq!(
            reference.output_dir(JobKind::Collect, root),
            PathBuf::from("/out/collected/chan/7")
        );
        assert_eq!(
            reference.output_dir(JobKind::Media, root),
            PathBuf::from("/out/media/chan/7")
        );
        assert_eq!(
            reference.output_dir(JobKind::Ingest, root),
            PathBuf::from("/out/wiki/chan/7")
        );
    }

    #[test]
    fn test_output_dir_external() {
        let reference = Reference::External(ExternalLink {
            host: VideoHost::Youtube,
            video_id: "dQw4w9WgXcQ".to_string(),
            url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
        });
        assert_eq!(
            reference.output_dir(JobKind::External, Path::new("/out")),
            PathBuf::from("/out/collected/external/youtube/dQw4w9WgXcQ")
        );
        assert_eq!(
            reference.initial_kind(ChatKindPolicy::Classify),
            JobKind::External
        );
    }

    #[test]
    fn test_initial_kind_for_chat_follows_policy() {
        let reference = chat(ChannelRef::Private(5), 1);
        assert_eq!(
            reference.initial_kind(ChatKindPolicy::Collect),
            JobKind::Collect
        );
        assert_eq!(
            reference.initial_kind(ChatKindPolicy::Classify),
            JobKind::Undetermined
        );
    }
}
