//! Removal of orphaned temporary files left behind by interrupted jobs.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

/// Delete files under `temp_dir` older than `retention`, then any empty
/// directories beneath it. Returns the number of files removed.
///
/// A missing `temp_dir` is not an error.
pub async fn cleanup_orphans(temp_dir: &Path, retention: Duration) -> io::Result<usize> {
    if tokio::fs::metadata(temp_dir).await.is_err() {
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;
    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut pending = vec![temp_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                dirs.push(path.clone());
                pending.push(path);
                continue;
            }

            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if modified > cutoff {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed orphaned file");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphaned file"),
            }
        }
    }

    // Deepest first, so parents empty out after their children.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        let is_empty = match tokio::fs::read_dir(&dir).await {
            Ok(mut entries) => entries.next_entry().await?.is_none(),
            Err(_) => false,
        };
        if is_empty {
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                warn!(path = %dir.display(), error = %e, "Failed to remove empty directory");
            }
        }
    }

    if removed > 0 {
        info!(dir = %temp_dir.display(), removed, "Cleaned up orphaned temp files");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_zero_retention_removes_everything() {
        let dir = TempDir::new().unwrap();
        let job_dir = dir.path().join("job-1");
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join("audio.ogg.part"), b"partial").unwrap();
        std::fs::write(dir.path().join("stray.tmp"), b"x").unwrap();

        let removed = cleanup_orphans(dir.path(), Duration::ZERO).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!job_dir.exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_recent_files_are_kept() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fresh.part"), b"x").unwrap();

        let removed = cleanup_orphans(dir.path(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("fresh.part").exists());
    }

    #[tokio::test]
    async fn test_missing_dir_is_ok() {
        let dir = TempDir::new().unwrap();
        let removed = cleanup_orphans(&dir.path().join("nope"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
