use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::{ChannelRef, ChatLink, ExternalLink, Reference, ReferenceError, VideoHost};

static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://\S+$").expect("valid regex"));

static CHAT_PRIVATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)https?://t\.me/c/(\d+)/(\d+)").expect("valid regex"));

static CHAT_PUBLIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://(?:www\.)?(?:t|telegram)\.me/([A-Za-z0-9_]+)/(\d+)")
        .expect("valid regex")
});

static CHAT_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://(?:www\.)?(?:t|telegram)\.me/").expect("valid regex"));

static YOUTUBE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^https?://(?:www\.|m\.)?(?:youtube\.com/(?:watch\?(?:[^#\s]*&)?v=|shorts/|embed/|live/)|youtu\.be/)([A-Za-z0-9_-]{6,})",
    )
    .expect("valid regex")
});

static X_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://(?:www\.|mobile\.)?(?:x|twitter)\.com/[^/\s]+/status/(\d+)")
        .expect("valid regex")
});

static VK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://(?:www\.|m\.)?vk\.(?:com|ru)/\S*?((?:video|clip)-?\d+_\d+)")
        .expect("valid regex")
});

static RUTUBE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://(?:www\.)?rutube\.ru/video/([A-Za-z0-9]+)").expect("valid regex")
});

static ANY_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://([^/\s?#]+)([^\s?#]*)").expect("valid regex"));

/// First path segments of the chat host that are not channels.
const RESERVED_CHAT_PATHS: &[&str] = &[
    "joinchat",
    "addstickers",
    "addemoji",
    "share",
    "proxy",
    "socks",
    "setlanguage",
    "iv",
    "s",
];

/// Parse a user-supplied link into a [`Reference`].
pub fn parse_reference(input: &str) -> Result<Reference, ReferenceError> {
    let url = input.trim();
    if url.is_empty() {
        return Err(ReferenceError::Empty);
    }

    if let Some(link) = parse_private_chat(url)? {
        return Ok(Reference::Chat(link));
    }

    if !LINK.is_match(url) {
        return Err(ReferenceError::NotALink(url.to_string()));
    }

    if CHAT_HOST.is_match(url) {
        return parse_public_chat(url).map(Reference::Chat);
    }

    Ok(Reference::External(parse_external(url)))
}

fn parse_private_chat(url: &str) -> Result<Option<ChatLink>, ReferenceError> {
    let Some(caps) = CHAT_PRIVATE.captures(url) else {
        return Ok(None);
    };

    let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
    let prefix = url[..start].trim_end();
    if prefix.ends_with(['=', '?', '&']) {
        return Err(ReferenceError::InvalidChatLink {
            url: url.to_string(),
            reason: "link is embedded inside another URL".to_string(),
        });
    }

    let chat_id = parse_id(url, caps.get(1).map(|m| m.as_str()), "chat id")?;
    let message_id = parse_id(url, caps.get(2).map(|m| m.as_str()), "message id")?;

    Ok(Some(ChatLink {
        channel: ChannelRef::Private(chat_id),
        message_id,
    }))
}

fn parse_public_chat(url: &str) -> Result<ChatLink, ReferenceError> {
    let caps = CHAT_PUBLIC
        .captures(url)
        .ok_or_else(|| ReferenceError::InvalidChatLink {
            url: url.to_string(),
            reason: "expected https://t.me/<channel>/<message_id>".to_string(),
        })?;

    let username = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    if RESERVED_CHAT_PATHS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(username))
    {
        return Err(ReferenceError::ReservedPath(url.to_string()));
    }

    let message_id = parse_id(url, caps.get(2).map(|m| m.as_str()), "message id")?;

    Ok(ChatLink {
        channel: ChannelRef::Public(username.to_string()),
        message_id,
    })
}

fn parse_id(url: &str, raw: Option<&str>, what: &str) -> Result<i64, ReferenceError> {
    let value = raw
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ReferenceError::InvalidChatLink {
            url: url.to_string(),
            reason: format!("{} is not a number", what),
        })?;

    if value == 0 {
        return Err(ReferenceError::InvalidChatLink {
            url: url.to_string(),
            reason: format!("{} cannot be 0", what),
        });
    }
    Ok(value)
}

fn parse_external(url: &str) -> ExternalLink {
    let known = [
        (&*YOUTUBE, VideoHost::Youtube),
        (&*X_STATUS, VideoHost::X),
        (&*VK, VideoHost::Vk),
        (&*RUTUBE, VideoHost::Rutube),
    ];

    for (pattern, host) in known {
        if let Some(id) = pattern.captures(url).and_then(|c| c.get(1)) {
            return ExternalLink {
                host,
                video_id: id.as_str().to_string(),
                url: url.to_string(),
            };
        }
    }

    ExternalLink {
        host: VideoHost::Other,
        video_id: other_video_id(url),
        url: url.to_string(),
    }
}

/// Last non-empty path segment (or the host), reduced to `[A-Za-z0-9_-]`.
fn other_video_id(url: &str) -> String {
    let (host, path) = ANY_URL
        .captures(url)
        .map(|c| {
            (
                c.get(1).map(|m| m.as_str()).unwrap_or_default(),
                c.get(2).map(|m| m.as_str()).unwrap_or_default(),
            )
        })
        .unwrap_or_default();

    let raw = path
        .split('/')
        .filter(|s| !s.is_empty())
        .next_back()
        .unwrap_or(host);

    let mut id = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            id.push(ch);
        } else if !id.ends_with('_') {
            id.push('_');
        }
    }
    let id = id.trim_matches('_').to_string();

    if id.is_empty() {
        "video".to_string()
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn external(url: &str) -> ExternalLink {
        match parse_reference(url).unwrap() {
            Reference::External(link) => link,
            other => panic!("expected external link, got {:?}", other),
        }
    }

    fn chat(url: &str) -> ChatLink {
        match parse_reference(url).unwrap() {
            Reference::Chat(link) => link,
            other => panic!("expected chat link, got {:?}", other),
        }
    }

    // ==========================================================================
    // Chat links
    // ==========================================================================

    #[test]
    fn test_private_chat_link() {
        let link = chat("https://t.me/c/1775135187/1197");
        assert_eq!(link.channel, ChannelRef::Private(1775135187));
        assert_eq!(link.message_id, 1197);
    }

    #[test]
    fn test_private_chat_link_ignores_query() {
        let link = chat("  https://t.me/c/1775135187/1197?single  ");
        assert_eq!(link.message_id, 1197);
    }

    #[test]
    fn test_private_chat_zero_ids_rejected() {
        assert!(parse_reference("https://t.me/c/0/5").is_err());
        assert!(parse_reference("https://t.me/c/5/0").is_err());
    }

    #[test]
    fn test_private_chat_embedded_in_other_url_rejected() {
        let result = parse_reference("https://example.com/redirect?to=https://t.me/c/123/45");
        assert!(matches!(
            result,
            Err(ReferenceError::InvalidChatLink { .. })
        ));
    }

    #[test]
    fn test_public_chat_link() {
        let link = chat("https://t.me/durov/42");
        assert_eq!(link.channel, ChannelRef::Public("durov".to_string()));
        assert_eq!(link.message_id, 42);
    }

    #[test]
    fn test_reserved_path_rejected() {
        assert!(matches!(
            parse_reference("https://t.me/joinchat/42"),
            Err(ReferenceError::ReservedPath(_))
        ));
    }

    #[test]
    fn test_chat_link_without_message_rejected() {
        assert!(matches!(
            parse_reference("https://t.me/durov"),
            Err(ReferenceError::InvalidChatLink { .. })
        ));
    }

    // ==========================================================================
    // External links
    // ==========================================================================

    #[test]
    fn test_youtube_variants() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=120",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
        ] {
            let link = external(url);
            assert_eq!(link.host, VideoHost::Youtube, "{}", url);
            assert_eq!(link.video_id, "dQw4w9WgXcQ", "{}", url);
            assert_eq!(link.url, url);
        }

        let shorts = external("https://www.youtube.com/shorts/abc12345678");
        assert_eq!(shorts.video_id, "abc12345678");
    }

    #[test]
    fn test_x_and_twitter() {
        let link = external("https://x.com/someone/status/1234567890123456789");
        assert_eq!(link.host, VideoHost::X);
        assert_eq!(link.video_id, "1234567890123456789");

        let link = external("https://www.twitter.com/user/status/111222333");
        assert_eq!(link.host, VideoHost::X);
        assert_eq!(link.video_id, "111222333");
    }

    #[test]
    fn test_vk() {
        let link = external("https://vk.com/video-123456_789012");
        assert_eq!(link.host, VideoHost::Vk);
        assert!(link.video_id.contains("video-123456_789012"));

        assert_eq!(external("https://vk.com/clip-123456_789012").host, VideoHost::Vk);
        assert_eq!(external("https://vk.ru/video-123_456").host, VideoHost::Vk);
        assert_eq!(
            external("https://vk.com/videos-1?z=video-1_2").video_id,
            "video-1_2"
        );
    }

    #[test]
    fn test_rutube() {
        let link = external("https://www.rutube.ru/video/abc123def456/");
        assert_eq!(link.host, VideoHost::Rutube);
        assert_eq!(link.video_id, "abc123def456");
    }

    #[test]
    fn test_other_hosts() {
        let link = external("https://rumble.com/some-video.html");
        assert_eq!(link.host, VideoHost::Other);
        assert_eq!(link.video_id, "some-video_html");

        let link = external("https://www.dailymotion.com/video/x8abc12");
        assert_eq!(link.host, VideoHost::Other);
        assert_eq!(link.video_id, "x8abc12");

        let link = external("https://example.org/");
        assert_eq!(link.video_id, "example_org");
    }

    // ==========================================================================
    // Invalid input
    // ==========================================================================

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(parse_reference(""), Err(ReferenceError::Empty));
        assert_eq!(parse_reference("   "), Err(ReferenceError::Empty));
        assert!(matches!(
            parse_reference("not a link at all"),
            Err(ReferenceError::NotALink(_))
        ));
        assert!(matches!(
            parse_reference("youtube.com/watch?v=abc"),
            Err(ReferenceError::NotALink(_))
        ));
    }
}
