//! Parsing of free-form notes into batch entries.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;

use crate::reference::{parse_reference, Reference, ReferenceError};

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("valid regex"));

/// Markers that open a group when they start a line.
const GROUP_MARKERS: &[&str] = &[
    "➡️", "➡", "👉", "❤️", "❤", "🔥", "⭐", "📌", "💡", "🎯", "✅", "📎", "📢", "🚀", "⚡", "-->",
    "->", "=>",
];

const LABEL_SEPARATORS: &[&str] = &[" - ", " | ", " — ", " – "];

const DEFAULT_TOPIC: &str = "Untitled";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NoteError {
    #[error("line {line}: {url}: {source}")]
    InvalidReference {
        line: usize,
        url: String,
        #[source]
        source: ReferenceError,
    },
}

/// One URL found in a note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEntry {
    pub url: String,
    /// `None` when the URL is not a supported reference.
    pub reference: Option<Reference>,
    pub label: String,
    /// Group marker the line started with.
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub topic: String,
    pub entries: Vec<NoteEntry>,
    pub errors: Vec<NoteError>,
}

/// Extract the topic and every URL (in order) from `text`.
pub fn parse_note(text: &str) -> Note {
    let mut topic = None;
    let mut entries = Vec::new();
    let mut errors = Vec::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let urls: Vec<&str> = URL_RE
            .find_iter(line)
            .map(|m| m.as_str().trim_end_matches([')', ']', ',', ';', '.', '!']))
            .collect();

        if urls.is_empty() {
            if topic.is_none() {
                let heading = line.trim_start_matches('#').trim();
                if !heading.is_empty() {
                    topic = Some(heading.to_string());
                }
            }
            continue;
        }

        let (group, rest) = split_group(line);
        let label = label_for(rest);

        for url in urls {
            let reference = match parse_reference(url) {
                Ok(reference) => Some(reference),
                Err(source) => {
                    errors.push(NoteError::InvalidReference {
                        line: line_no + 1,
                        url: url.to_string(),
                        source,
                    });
                    None
                }
            };
            entries.push(NoteEntry {
                url: url.to_string(),
                reference,
                label: label.clone(),
                group: group.map(String::from),
            });
        }
    }

    Note {
        topic: topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
        entries,
        errors,
    }
}

fn split_group(line: &str) -> (Option<&str>, &str) {
    for marker in GROUP_MARKERS {
        if let Some(rest) = line.strip_prefix(marker) {
            return (Some(marker), rest.trim_start());
        }
    }
    (None, line)
}

fn label_for(line: &str) -> String {
    let mut label = URL_RE.replace_all(line, " ").into_owned();
    for separator in LABEL_SEPARATORS {
        label = label.replace(separator, " ");
    }
    let label = label
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '|' | ':' | '—' | '–'))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    label
}

/// Lowercase, runs of non-alphanumerics collapsed to `_`, at most `max_len` chars.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::new();
    let mut pending_sep = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }

    let slug: String = slug.chars().take(max_len).collect();
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_groups_and_labels() {
        let note = parse_note(
            "# Conference talks\n\
             \n\
             👉 Keynote - https://youtu.be/abc123\n\
             -> https://t.me/somechan/42 | panel discussion\n\
             plain https://t.me/otherchan/7).\n",
        );

        assert_eq!(note.topic, "Conference talks");
        assert_eq!(note.entries.len(), 3);
        assert!(note.errors.is_empty());

        assert_eq!(note.entries[0].group.as_deref(), Some("👉"));
        assert_eq!(note.entries[0].label, "Keynote");
        assert_eq!(note.entries[1].group.as_deref(), Some("->"));
        assert_eq!(note.entries[1].label, "panel discussion");
        assert_eq!(note.entries[2].group, None);
        assert_eq!(note.entries[2].url, "https://t.me/otherchan/7");
        assert_eq!(note.entries[2].label, "plain");
    }

    #[test]
    fn test_invalid_url_is_recorded() {
        let note = parse_note("https://t.me/joinchat/AAAA\nhttps://youtu.be/abc123");
        assert_eq!(note.topic, "Untitled");
        assert_eq!(note.entries.len(), 2);
        assert!(note.entries[0].reference.is_none());
        assert!(note.entries[1].reference.is_some());
        assert_eq!(note.errors.len(), 1);
        assert!(matches!(
            &note.errors[0],
            NoteError::InvalidReference { line: 1, .. }
        ));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Conference Talks: 2024!", 60), "conference_talks_2024");
        assert_eq!(slugify("  ***  ", 60), "untitled");
        assert_eq!(slugify("Привет мир", 60), "привет_мир");
        assert_eq!(slugify("abc def ghi", 5), "abc_d");
        assert_eq!(slugify("abcd efgh", 5), "abcd");
    }
}
