//! Synchronization orchestrator: coalesces requests, decides direction,
//! transfers files, and signals completion.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::settings::SettingsStore;
use crate::storage::{LocalFile, StorePaths, BUNDLE_FILE_NAME};
use crate::sync::remote::{remote_file_name, ConnectivityProbe, RemoteFileInfo, RemoteStorage};
use crate::sync::SyncEvent;
use crate::{KeyfortError, Result};

/// Upper bound on the remote listing; anything beyond it is ignored.
const MAX_REMOTE_FILES: usize = 1000;

const EVENT_CHANNEL_CAPACITY: usize = 16;

struct RunOutcome {
    succeeded: bool,
    requires_reload: bool,
}

impl RunOutcome {
    fn skipped() -> Self {
        Self {
            succeeded: false,
            requires_reload: false,
        }
    }
}

/// Runs at most one synchronization at a time against the store directory.
///
/// `queue_synchronization` schedules a background run under a child of the
/// current cancellation scope; `cancel` invalidates the scope and installs
/// a fresh one, so runs queued afterwards are unaffected. Overlapping
/// queue requests serialize behind the run gate in arrival order.
pub struct SyncOrchestrator {
    paths: StorePaths,
    settings: Arc<dyn SettingsStore>,
    connectivity: Arc<dyn ConnectivityProbe>,
    providers: StdRwLock<HashMap<String, Arc<dyn RemoteStorage>>>,
    run_gate: Mutex<()>,
    scope: StdMutex<CancellationToken>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    pub fn new(paths: StorePaths, settings: Arc<dyn SettingsStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            paths,
            settings,
            connectivity: Arc::new(crate::sync::AlwaysOnline),
            providers: StdRwLock::new(HashMap::new()),
            run_gate: Mutex::new(()),
            scope: StdMutex::new(CancellationToken::new()),
            events,
        }
    }

    pub fn with_connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity = probe;
        self
    }

    /// Register a remote provider under the name the settings store selects.
    pub fn register_provider(&self, name: impl Into<String>, remote: Arc<dyn RemoteStorage>) {
        self.providers
            .write()
            .expect("provider lock")
            .insert(name.into(), remote);
    }

    /// Subscribe to run events. Receivers deregister by dropping.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Schedule a background run. Requests issued while a run is in flight
    /// queue behind it; each runs under a child of the scope current at
    /// queue time.
    pub fn queue_synchronization(self: Arc<Self>) {
        let token = self.scope.lock().expect("scope lock").child_token();
        tokio::spawn(async move {
            self.run(token).await;
        });
    }

    /// Cancel any pending or running synchronization and open a new
    /// cancellation scope for subsequent requests.
    pub fn cancel(&self) {
        let mut scope = self.scope.lock().expect("scope lock");
        scope.cancel();
        *scope = CancellationToken::new();
    }

    async fn run(&self, token: CancellationToken) {
        let _guard = self.run_gate.lock().await;
        if token.is_cancelled() {
            debug!("synchronization canceled while pending");
            self.emit_completed(false, false);
            return;
        }

        let _ = self.events.send(SyncEvent::Started);

        match self.run_once(&token).await {
            Ok(outcome) => self.emit_completed(outcome.succeeded, outcome.requires_reload),
            Err(KeyfortError::Canceled) => {
                debug!("synchronization canceled");
                self.emit_completed(false, false);
            }
            Err(e) => {
                warn!(error = %e, "synchronization failed");
                self.emit_completed(false, false);
            }
        }
    }

    fn emit_completed(&self, succeeded: bool, requires_reload: bool) {
        let _ = self.events.send(SyncEvent::Completed {
            succeeded,
            requires_reload,
        });
    }

    async fn run_once(&self, token: &CancellationToken) -> Result<RunOutcome> {
        if !self.settings.sync_enabled() {
            debug!("synchronization disabled, skipping");
            return Ok(RunOutcome::skipped());
        }

        let Some(provider) = self.selected_provider() else {
            debug!("no remote provider configured, skipping");
            return Ok(RunOutcome::skipped());
        };

        if !self.connectivity.is_online() {
            debug!("no network path available, skipping");
            return Ok(RunOutcome::skipped());
        }

        if token.is_cancelled() {
            return Err(KeyfortError::Canceled);
        }

        let signed_in = match provider.sign_in(false, token).await {
            Ok(ok) => ok,
            Err(KeyfortError::Canceled) => return Err(KeyfortError::Canceled),
            Err(e) => {
                warn!(error = %e, "sign-in errored");
                false
            }
        };
        if !signed_in {
            warn!("non-interactive sign-in failed, disabling synchronization");
            self.settings.set_sync_enabled(false);
            provider.sign_out().await;
            return Err(KeyfortError::Unauthenticated);
        }

        let remote_files = provider.list_files(MAX_REMOTE_FILES, token).await?;
        let local_files = self.paths.list_local_files().await?;

        let remote_bundle = remote_files
            .iter()
            .find(|f| remote_file_name(&f.path) == BUNDLE_FILE_NAME);
        let local_bundle = local_files.iter().find(|f| f.name == BUNDLE_FILE_NAME);

        if remote_bundle.is_none() && local_bundle.is_none() {
            debug!("no bundle on either side, nothing to synchronize");
            return Ok(RunOutcome {
                succeeded: true,
                requires_reload: false,
            });
        }

        if token.is_cancelled() {
            return Err(KeyfortError::Canceled);
        }

        // Download when there is no local bundle or the remote one is
        // strictly newer; upload otherwise.
        if let Some(remote) = remote_bundle {
            let remote_newer = local_bundle.is_none_or(|l| remote.last_modified > l.modified);
            if remote_newer {
                self.download_all(provider.as_ref(), remote, &remote_files, &local_files, token)
                    .await?;
                info!("synchronization pulled remote bundle");
                return Ok(RunOutcome {
                    succeeded: true,
                    requires_reload: true,
                });
            }
        }

        if let Some(local) = local_bundle {
            self.upload_all(provider.as_ref(), local, &remote_files, &local_files, token)
                .await?;
            info!("synchronization pushed local bundle");
        }
        Ok(RunOutcome {
            succeeded: true,
            requires_reload: false,
        })
    }

    fn selected_provider(&self) -> Option<Arc<dyn RemoteStorage>> {
        let name = self.settings.provider_name()?;
        self.providers
            .read()
            .expect("provider lock")
            .get(&name)
            .cloned()
    }

    /// Pull the remote bundle and every remote-only attachment, then drop
    /// local attachments the remote no longer has.
    async fn download_all(
        &self,
        provider: &dyn RemoteStorage,
        remote_bundle: &RemoteFileInfo,
        remote_files: &[RemoteFileInfo],
        local_files: &[LocalFile],
        token: &CancellationToken,
    ) -> Result<()> {
        self.paths.ensure_root().await?;
        self.fetch(provider, &remote_bundle.path, token).await?;

        let local_names: HashSet<&str> = local_files.iter().map(|f| f.name.as_str()).collect();
        let remote_names: HashSet<&str> = remote_files
            .iter()
            .map(|f| remote_file_name(&f.path))
            .collect();

        for file in remote_files {
            if token.is_cancelled() {
                return Err(KeyfortError::Canceled);
            }
            let name = remote_file_name(&file.path);
            if name == BUNDLE_FILE_NAME || local_names.contains(name) {
                continue;
            }
            self.fetch(provider, &file.path, token).await?;
        }

        for file in local_files {
            if token.is_cancelled() {
                return Err(KeyfortError::Canceled);
            }
            if file.name == BUNDLE_FILE_NAME || remote_names.contains(file.name.as_str()) {
                continue;
            }
            debug!(name = %file.name, "removing attachment absent from remote");
            tokio::fs::remove_file(&file.path).await?;
        }

        Ok(())
    }

    /// Push the local bundle and every local-only attachment, then drop
    /// remote attachments the local store no longer has.
    async fn upload_all(
        &self,
        provider: &dyn RemoteStorage,
        local_bundle: &LocalFile,
        remote_files: &[RemoteFileInfo],
        local_files: &[LocalFile],
        token: &CancellationToken,
    ) -> Result<()> {
        self.push(provider, &local_bundle.path, token).await?;

        let remote_names: HashSet<&str> = remote_files
            .iter()
            .map(|f| remote_file_name(&f.path))
            .collect();
        let local_names: HashSet<&str> = local_files.iter().map(|f| f.name.as_str()).collect();

        for file in local_files {
            if token.is_cancelled() {
                return Err(KeyfortError::Canceled);
            }
            if file.name == BUNDLE_FILE_NAME || remote_names.contains(file.name.as_str()) {
                continue;
            }
            self.push(provider, &file.path, token).await?;
        }

        for file in remote_files {
            if token.is_cancelled() {
                return Err(KeyfortError::Canceled);
            }
            let name = remote_file_name(&file.path);
            if name == BUNDLE_FILE_NAME || local_names.contains(name) {
                continue;
            }
            debug!(name, "deleting remote attachment absent locally");
            provider.delete_file(&file.path, token).await?;
        }

        Ok(())
    }

    /// Download one remote file into the store directory under its name.
    async fn fetch(
        &self,
        provider: &dyn RemoteStorage,
        remote_path: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        let staged = provider
            .download_file(remote_path, token)
            .await?
            .ok_or_else(|| {
                KeyfortError::LoadFailure(format!("download of {remote_path} failed"))
            })?;

        let target = self.paths.root().join(remote_file_name(remote_path));
        tokio::fs::copy(&staged, &target).await?;
        let _ = tokio::fs::remove_file(&staged).await;
        Ok(())
    }

    async fn push(
        &self,
        provider: &dyn RemoteStorage,
        local_path: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        if !provider.upload_file(local_path, token).await? {
            return Err(KeyfortError::TransientIo(std::io::Error::other(format!(
                "upload of {} rejected",
                local_path.display()
            ))));
        }
        Ok(())
    }
}
