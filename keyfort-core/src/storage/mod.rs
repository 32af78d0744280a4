//! On-disk layout, bundle framing, and the bounded-retry writer.
//!
//! Everything under one data directory: the canonical bundle file plus one
//! file per attachment, named by its id. The synchronization layer treats
//! any file in the directory that is not the bundle as an attachment.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::{KeyfortError, Result};

/// Well-known name of the canonical bundle file.
pub const BUNDLE_FILE_NAME: &str = "vault.bundle";

/// Version written in the bundle prefix. Files without a prefix are
/// legacy version 1.
pub const CURRENT_BUNDLE_VERSION: u32 = 2;

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF_MS: u64 = 100;

/// Filesystem layout of one local store.
#[derive(Debug, Clone)]
pub struct StorePaths {
    root: PathBuf,
}

/// A file found in the local store directory.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform data directory (`~/.local/share/KeyFort` and friends).
    pub fn default_location() -> Self {
        let base = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("KeyFort"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.root.join(BUNDLE_FILE_NAME)
    }

    pub fn attachment_path(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Every regular file in the store directory with its modification time.
    /// A missing directory is an empty store, not an error.
    pub async fn list_local_files(&self) -> Result<Vec<LocalFile>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map(DateTime::<Utc>::from)?;
            files.push(LocalFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                modified,
            });
        }
        Ok(files)
    }
}

/// Frame a ciphertext as `<version>:<ciphertext>`.
pub fn encode_bundle(version: u32, ciphertext: &[u8]) -> Vec<u8> {
    let prefix = format!("{version}:");
    let mut framed = Vec::with_capacity(prefix.len() + ciphertext.len());
    framed.extend_from_slice(prefix.as_bytes());
    framed.extend_from_slice(ciphertext);
    framed
}

/// Split a bundle into its version and ciphertext. A missing separator
/// means a legacy version-1 file of raw ciphertext.
pub fn split_bundle(bytes: &[u8]) -> (u32, &[u8]) {
    // The prefix is at most ten digits plus the separator.
    let scan = bytes.len().min(11);
    if let Some(pos) = bytes[..scan].iter().position(|&b| b == b':') {
        if pos > 0 && bytes[..pos].iter().all(|b| b.is_ascii_digit()) {
            if let Ok(version) = std::str::from_utf8(&bytes[..pos]).unwrap_or("").parse::<u32>() {
                return (version, &bytes[pos + 1..]);
            }
        }
    }
    (1, bytes)
}

/// Write a file, retrying transient failures with a linear backoff. The
/// exhausted-retry error is returned to the caller; swallowing it is the
/// save boundary's decision, not this writer's.
pub async fn write_with_retry(
    path: &Path,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(KeyfortError::Canceled);
        }
        match tokio::fs::write(path, bytes).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < WRITE_ATTEMPTS => {
                warn!(
                    path = %path.display(),
                    attempt,
                    error = %e,
                    "file write failed, retrying"
                );
                sleep(Duration::from_millis(WRITE_BACKOFF_MS * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_frame_roundtrip() {
        let framed = encode_bundle(CURRENT_BUNDLE_VERSION, b"ciphertext-bytes");
        let (version, body) = split_bundle(&framed);
        assert_eq!(version, CURRENT_BUNDLE_VERSION);
        assert_eq!(body, b"ciphertext-bytes");
    }

    #[test]
    fn missing_separator_is_legacy_version_one() {
        let raw = [0x9Au8, 0x01, 0xFF, 0x42];
        let (version, body) = split_bundle(&raw);
        assert_eq!(version, 1);
        assert_eq!(body, &raw);
    }

    #[test]
    fn binary_ciphertext_with_early_colon_byte_is_not_a_prefix() {
        // A ':' after non-digit bytes must not be taken as a separator.
        let raw = [0xFFu8, b':', 0x01, 0x02];
        let (version, body) = split_bundle(&raw);
        assert_eq!(version, 1);
        assert_eq!(body, &raw);
    }

    #[test]
    fn legacy_file_shorter_than_prefix_window() {
        let (version, body) = split_bundle(b"ab");
        assert_eq!(version, 1);
        assert_eq!(body, b"ab");
    }

    #[tokio::test]
    async fn list_local_files_on_missing_dir_is_empty() {
        let paths = StorePaths::new("/nonexistent/keyfort-test-store");
        assert!(paths.list_local_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_with_retry_writes_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        let cancel = CancellationToken::new();

        write_with_retry(&paths.bundle_path(), b"data", &cancel)
            .await
            .unwrap();

        let files = paths.list_local_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, BUNDLE_FILE_NAME);
    }

    #[tokio::test]
    async fn canceled_write_reports_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = write_with_retry(&paths.bundle_path(), b"data", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, KeyfortError::Canceled));
    }
}
