//! Filesystem helpers shared by the stage pipelines.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Write `contents` to `path` through a sibling temp file and a rename.
///
/// Returns the number of bytes written.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = partial_path(path);
    let mut file = File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(contents.len() as u64)
}

/// Temp name used while a file is being produced.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path).await?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut hasher = Sha256::new();

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Size of a regular file, or `None` if it is missing.
pub async fn file_size(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Whether `path` holds a complete copy of a previously acquired file.
///
/// The file must exist with the expected size (when known) and match the
/// recorded SHA-256 (when one was recorded).
pub async fn is_complete(path: &Path, expected_size: Option<u64>, sha256: Option<&str>) -> bool {
    let Some(size) = file_size(path).await else {
        return false;
    };
    if size == 0 || expected_size.is_some_and(|expected| expected != size) {
        return false;
    }
    match sha256 {
        Some(expected) => match sha256_file(path).await {
            Ok(actual) => actual.eq_ignore_ascii_case(expected),
            Err(_) => false,
        },
        None => true,
    }
}

/// Path of `path` relative to `root`, with forward slashes.
pub fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
