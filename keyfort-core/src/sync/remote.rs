//! Remote storage capability consumed by the orchestrator.
//!
//! Concrete providers (cloud file-storage backends) live outside the core
//! and register with the orchestrator under the provider name the settings
//! store selects.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::Result;

/// A file visible on the remote store.
#[derive(Debug, Clone)]
pub struct RemoteFileInfo {
    /// Provider-specific path; the final segment is the file name.
    pub path: String,
    pub last_modified: DateTime<Utc>,
}

/// File-level remote store operations.
///
/// `download_file` materializes the remote content as a temporary local
/// file and returns its path, or `None` when the provider reports a
/// non-exceptional failure. `upload_file` likewise reports rejection via
/// `false` rather than an error.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn sign_in(&self, interactive: bool, cancel: &CancellationToken) -> Result<bool>;

    async fn list_files(
        &self,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteFileInfo>>;

    async fn download_file(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>>;

    async fn upload_file(&self, local_file: &Path, cancel: &CancellationToken) -> Result<bool>;

    async fn delete_file(&self, path: &str, cancel: &CancellationToken) -> Result<()>;

    async fn sign_out(&self);
}

/// Reachability check consulted before a run touches the network.
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Default probe for hosts without a platform reachability API.
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Final path segment of a remote path.
pub(crate) fn remote_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
