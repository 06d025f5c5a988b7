//! Completion marker.
//!
//! `manifest.json` is the last file written for a job and lists every other
//! artifact with its size. A directory whose manifest is missing or does not
//! verify is treated as incomplete.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::files::{file_size, relative_name, remove_if_exists, write_atomic};
use crate::acquisition::mime_for_path;
use crate::job::JobKind;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestArtifact {
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Path relative to the job directory.
    pub file: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub artifacts: Vec<ManifestArtifact>,
    pub total_size_bytes: u64,
    pub completed_at: DateTime<Utc>,
}

/// What a job directory's marker says.
#[derive(Debug)]
pub enum MarkerState {
    Absent,
    Valid(Manifest),
    /// A marker exists but cannot be trusted.
    Invalid(String),
}

impl Manifest {
    pub fn new(kind: JobKind, source: Option<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            kind,
            source,
            artifacts: Vec::new(),
            total_size_bytes: 0,
            completed_at: Utc::now(),
        }
    }

    /// Add a file under `dir`, taking its size from disk.
    pub async fn add_file(
        &mut self,
        dir: &Path,
        path: &Path,
        artifact_type: &str,
        sha256: Option<String>,
    ) -> std::io::Result<()> {
        let size_bytes = fs::metadata(path).await?.len();
        self.artifacts.push(ManifestArtifact {
            artifact_type: artifact_type.to_string(),
            file: relative_name(dir, path),
            size_bytes,
            mime_type: mime_for_path(path).map(String::from),
            sha256,
        });
        self.total_size_bytes += size_bytes;
        Ok(())
    }

    pub fn artifact(&self, file: &str) -> Option<&ManifestArtifact> {
        self.artifacts.iter().find(|a| a.file == file)
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Write the marker. Must be called after every listed artifact is on disk.
    pub async fn write_atomic(&mut self, dir: &Path) -> std::io::Result<PathBuf> {
        self.completed_at = Utc::now();
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let path = Self::path(dir);
        write_atomic(&path, &json).await?;
        Ok(path)
    }

    /// Check that every listed artifact exists with its recorded size.
    pub async fn verify(&self, dir: &Path) -> Result<(), String> {
        let mut problems = Vec::new();
        for artifact in &self.artifacts {
            match file_size(&dir.join(&artifact.file)).await {
                None => problems.push(format!("{} is missing", artifact.file)),
                Some(size) if size != artifact.size_bytes => problems.push(format!(
                    "{} has {} bytes, expected {}",
                    artifact.file, size, artifact.size_bytes
                )),
                Some(_) => {}
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    /// Read and verify the marker in `dir`.
    pub async fn check(dir: &Path) -> MarkerState {
        let bytes = match fs::read(Self::path(dir)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return MarkerState::Absent,
            Err(e) => return MarkerState::Invalid(format!("unreadable marker: {}", e)),
        };
        let manifest: Manifest = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(e) => return MarkerState::Invalid(format!("corrupt marker: {}", e)),
        };
        match manifest.verify(dir).await {
            Ok(()) => MarkerState::Valid(manifest),
            Err(reason) => MarkerState::Invalid(reason),
        }
    }

    pub async fn remove(dir: &Path) -> std::io::Result<()> {
        remove_if_exists(&Self::path(dir)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn completed_dir() -> (TempDir, Manifest) {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("text.txt");
        std::fs::write(&text, "hello world").unwrap();
        std::fs::create_dir_all(dir.path().join("attachments")).unwrap();
        let audio = dir.path().join("attachments").join("a.mp3");
        std::fs::write(&audio, vec![0u8; 32]).unwrap();

        let mut manifest = Manifest::new(JobKind::Collect, None);
        manifest.add_file(dir.path(), &text, "text", None).await.unwrap();
        manifest
            .add_file(dir.path(), &audio, "attachment", None)
            .await
            .unwrap();
        manifest.write_atomic(dir.path()).await.unwrap();
        (dir, manifest)
    }

    #[tokio::test]
    async fn test_valid_marker() {
        let (dir, manifest) = completed_dir().await;
        assert_eq!(manifest.total_size_bytes, 43);
        assert_eq!(
            manifest.artifact("attachments/a.mp3").unwrap().mime_type.as_deref(),
            Some("audio/mpeg")
        );

        match Manifest::check(dir.path()).await {
            MarkerState::Valid(read) => assert_eq!(read.artifacts.len(), 2),
            other => panic!("expected valid marker, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_invalidates_marker() {
        let (dir, _) = completed_dir().await;
        std::fs::remove_file(dir.path().join("attachments").join("a.mp3")).unwrap();

        match Manifest::check(dir.path()).await {
            MarkerState::Invalid(reason) => assert!(reason.contains("attachments/a.mp3")),
            other => panic!("expected invalid marker, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_artifact_invalidates_marker() {
        let (dir, _) = completed_dir().await;
        std::fs::write(dir.path().join("text.txt"), "hello").unwrap();
        assert!(matches!(
            Manifest::check(dir.path()).await,
            MarkerState::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn test_absent_and_corrupt() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(Manifest::check(dir.path()).await, MarkerState::Absent));

        std::fs::write(dir.path().join(MANIFEST_FILE), "{not json").unwrap();
        assert!(matches!(
            Manifest::check(dir.path()).await,
            MarkerState::Invalid(_)
        ));

        Manifest::remove(dir.path()).await.unwrap();
        assert!(matches!(Manifest::check(dir.path()).await, MarkerState::Absent));
    }
}
