//! Topic index written after a batch run.
//!
//! Layout under the topic directory:
//!
//! ```text
//! INDEX.md
//! index.json
//! 01_keynote/
//!     source_url.txt
//!     label.txt
//!     artifacts -> <job output dir>
//! ```

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use super::note::slugify;
use super::runner::{BatchItem, BatchResult};
use crate::pipeline::files::write_atomic;

pub const INDEX_MD: &str = "INDEX.md";
pub const INDEX_JSON: &str = "index.json";

const DEFAULT_GROUP: &str = "BASE";
const ENTRY_SLUG_LEN: usize = 40;

#[derive(Debug, Serialize)]
struct IndexDoc<'a> {
    version: u32,
    topic: &'a str,
    topic_slug: String,
    created_at: String,
    finished_at: String,
    total: usize,
    succeeded: usize,
    failed: usize,
    groups: Vec<IndexGroup<'a>>,
}

#[derive(Debug, Serialize)]
struct IndexGroup<'a> {
    prefix: &'a str,
    entries: Vec<IndexEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct IndexEntry<'a> {
    index: usize,
    url: &'a str,
    label: &'a str,
    status: &'static str,
    folder: String,
    artifact_dir: Option<&'a Path>,
    error: Option<&'a str>,
}

/// Folder name for the `position`-th entry (1-based).
pub fn entry_folder(position: usize, label: &str) -> String {
    let slug = if label.trim().is_empty() {
        "link".to_string()
    } else {
        slugify(label, ENTRY_SLUG_LEN)
    };
    format!("{:02}_{}", position, slug)
}

/// Group items by marker, keeping first-seen group order and input order within a group.
fn group_items(items: &[BatchItem]) -> Vec<(&str, Vec<(usize, &BatchItem)>)> {
    let mut groups: Vec<(&str, Vec<(usize, &BatchItem)>)> = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let prefix = item.group.as_deref().unwrap_or(DEFAULT_GROUP);
        match groups.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, entries)) => entries.push((idx + 1, item)),
            None => groups.push((prefix, vec![(idx + 1, item)])),
        }
    }
    groups
}

fn status_of(item: &BatchItem) -> &'static str {
    if item.success {
        "done"
    } else {
        "error"
    }
}

fn render_markdown(result: &BatchResult) -> String {
    let mut md = format!("# {}\n\n", result.topic);
    md.push_str(&format!(
        "- Started: {}\n- Finished: {}\n- Total: {}\n- Succeeded: {}\n- Failed: {}\n",
        result.started_at.to_rfc3339(),
        result.finished_at.to_rfc3339(),
        result.total,
        result.succeeded,
        result.failed,
    ));

    for (prefix, entries) in group_items(&result.items) {
        md.push_str(&format!("\n## {}\n\n", prefix));
        md.push_str("| # | Label | Status | Folder | Source |\n");
        md.push_str("|---|---|---|---|---|\n");
        for (position, item) in entries {
            let label = if item.label.is_empty() {
                "-"
            } else {
                item.label.as_str()
            };
            let status = match (&item.error, item.success) {
                (Some(err), false) => format!("error: {}", err.replace('|', "/")),
                _ => status_of(item).to_string(),
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                position,
                label.replace('|', "/"),
                status,
                entry_folder(position, &item.label),
                item.url,
            ));
        }
    }
    md
}

fn build_doc(result: &BatchResult) -> IndexDoc<'_> {
    let groups = group_items(&result.items)
        .into_iter()
        .map(|(prefix, entries)| IndexGroup {
            prefix,
            entries: entries
                .into_iter()
                .map(|(position, item)| IndexEntry {
                    index: position,
                    url: &item.url,
                    label: &item.label,
                    status: status_of(item),
                    folder: entry_folder(position, &item.label),
                    artifact_dir: item.artifact_dir.as_deref(),
                    error: item.error.as_deref(),
                })
                .collect(),
        })
        .collect();

    IndexDoc {
        version: 1,
        topic: &result.topic,
        topic_slug: result
            .topic_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        created_at: result.started_at.to_rfc3339(),
        finished_at: result.finished_at.to_rfc3339(),
        total: result.total,
        succeeded: result.succeeded,
        failed: result.failed,
        groups,
    }
}

/// Write the index files and one folder per entry.
pub async fn write_index(result: &BatchResult) -> io::Result<()> {
    let dir = &result.topic_dir;
    tokio::fs::create_dir_all(dir).await?;

    for (idx, item) in result.items.iter().enumerate() {
        let folder = dir.join(entry_folder(idx + 1, &item.label));
        tokio::fs::create_dir_all(&folder).await?;
        write_atomic(&folder.join("source_url.txt"), item.url.as_bytes()).await?;
        if !item.label.is_empty() {
            write_atomic(&folder.join("label.txt"), item.label.as_bytes()).await?;
        }
        if let Some(target) = &item.artifact_dir {
            if let Err(e) = link_artifacts(target, &folder.join("artifacts")).await {
                warn!(target = %target.display(), error = %e, "Could not link artifacts");
            }
        }
    }

    let json = serde_json::to_vec_pretty(&build_doc(result)).map_err(io::Error::other)?;
    write_atomic(&dir.join(INDEX_JSON), &json).await?;
    write_atomic(&dir.join(INDEX_MD), render_markdown(result).as_bytes()).await?;

    debug!(dir = %dir.display(), entries = result.items.len(), "Batch index written");
    Ok(())
}

async fn link_artifacts(target: &Path, link: &Path) -> io::Result<()> {
    if tokio::fs::symlink_metadata(link).await.is_ok() {
        remove_link(link).await?;
    }
    create_link(target, link).await
}

#[cfg(unix)]
async fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    copy_dir(target.to_path_buf(), link.to_path_buf()).await
}

#[cfg(not(unix))]
async fn copy_dir(from: PathBuf, to: PathBuf) -> io::Result<()> {
    let mut pending = vec![(from, to)];
    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), target).await?;
            }
        }
    }
    Ok(())
}

async fn remove_link(link: &Path) -> io::Result<()> {
    let meta = tokio::fs::symlink_metadata(link).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(link).await
    } else {
        tokio::fs::remove_file(link).await
    }
}

/// Topic directory a batch for `topic` writes into.
pub fn topic_dir(output_dir: &Path, topic: &str) -> PathBuf {
    output_dir
        .join("collected")
        .join("topics")
        .join(slugify(topic, super::runner::TOPIC_SLUG_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn item(url: &str, label: &str, group: Option<&str>, success: bool) -> BatchItem {
        BatchItem {
            url: url.to_string(),
            label: label.to_string(),
            group: group.map(String::from),
            success,
            job_id: None,
            error: (!success).then(|| "boom".to_string()),
            artifact_dir: None,
        }
    }

    #[test]
    fn test_entry_folder() {
        assert_eq!(entry_folder(1, "Keynote Talk"), "01_keynote_talk");
        assert_eq!(entry_folder(12, ""), "12_link");
    }

    #[test]
    fn test_groups_keep_first_seen_order() {
        let items = vec![
            item("u1", "", Some("->"), true),
            item("u2", "", None, true),
            item("u3", "", Some("->"), false),
        ];
        let groups = group_items(&items);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "->");
        assert_eq!(
            groups[0].1.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(groups[1].0, "BASE");
    }

    #[tokio::test]
    async fn test_write_index_one_folder_per_item() {
        let dir = TempDir::new().unwrap();
        let artifacts = dir.path().join("job");
        tokio::fs::create_dir_all(&artifacts).await.unwrap();

        let mut first = item("https://youtu.be/abc123", "Keynote", None, true);
        first.artifact_dir = Some(artifacts.clone());
        let result = BatchResult {
            topic: "Talks".to_string(),
            topic_dir: topic_dir(dir.path(), "Talks"),
            items: vec![first, item("https://t.me/x/1", "", None, false)],
            started_at: Utc::now(),
            finished_at: Utc::now(),
            total: 2,
            succeeded: 1,
            failed: 1,
        };

        write_index(&result).await.unwrap();

        let topic = dir.path().join("collected/topics/talks");
        assert!(topic.join(INDEX_MD).is_file());
        assert!(topic.join("01_keynote/source_url.txt").is_file());
        assert!(topic.join("01_keynote/label.txt").is_file());
        assert!(topic.join("01_keynote/artifacts").exists());
        assert!(topic.join("02_link/source_url.txt").is_file());

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(topic.join(INDEX_JSON)).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["topic_slug"], "talks");
        assert_eq!(json["total"], 2);
        let entries = json["groups"][0]["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["status"], "done");
        assert_eq!(entries[1]["status"], "error");
    }
}
