//! Content references: chat post links and external video URLs.

mod parser;
mod types;

pub use parser::parse_reference;
pub use types::{ChannelRef, ChatLink, ExternalLink, Reference, ReferenceError, VideoHost};
