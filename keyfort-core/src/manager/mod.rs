//! Data manager: owns the resident dataset and serializes every operation.
//!
//! All public operations acquire the per-manager gate before touching the
//! dataset, so at most one logical operation is in flight and queued
//! callers run in arrival order (the tokio mutex hands the lock to waiters
//! fairly). The gate is released on every exit path through its guard.
//!
//! Mutations persist the bundle before returning and queue a
//! synchronization run; an exhausted-retry save is logged and swallowed so
//! the in-memory state stays usable while the disk copy is stale.


use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::Cipher;
use crate::merge::merge_into;
use crate::model::{Account, Category, Dataset, ALL_CATEGORY_ID};
use crate::storage::{
    encode_bundle, split_bundle, write_with_retry, StorePaths, CURRENT_BUNDLE_VERSION,
};
use crate::sync::{SyncEvent, SyncOrchestrator};
use crate::upgrade::{StandardUpgrade, UpgradeService};
use crate::{KeyfortError, Result};

struct ManagerState {
    cipher: Option<Arc<dyn Cipher>>,
    dataset: Option<Dataset>,
}

struct SyncAttachment {
    orchestrator: Arc<SyncOrchestrator>,
    listener: JoinHandle<()>,
}

/// Owner of the single resident [`Dataset`].
pub struct DataManager {
    state: Mutex<ManagerState>,
    paths: StorePaths,
    upgrade: Arc<dyn UpgradeService>,
    sync: StdMutex<Option<SyncAttachment>>,
}

impl DataManager {
    pub fn new(paths: StorePaths) -> Self {
        Self::with_upgrade(paths, Arc::new(StandardUpgrade))
    }

    pub fn with_upgrade(paths: StorePaths, upgrade: Arc<dyn UpgradeService>) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                cipher: None,
                dataset: None,
            }),
            paths,
            upgrade,
            sync: StdMutex::new(None),
        }
    }

    /// Supply the keyed encryption capability. Until this is called, every
    /// operation that touches the bundle fails with invalid state.
    pub async fn set_cipher(&self, cipher: Arc<dyn Cipher>) {
        self.state.lock().await.cipher = Some(cipher);
    }

    /// Register this manager as the consumer of the orchestrator's
    /// completion events and the target for queued synchronization.
    ///
    /// At most one attachment is active; attaching again replaces (and
    /// stops) the previous listener. The listener holds only a weak
    /// reference, so dropping the manager tears it down.
    pub fn attach_sync(self: Arc<Self>, orchestrator: Arc<SyncOrchestrator>) {
        let mut rx = orchestrator.subscribe();
        let weak = Arc::downgrade(&self);
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SyncEvent::Completed {
                        succeeded: true,
                        requires_reload: true,
                    }) => {
                        let Some(manager) = weak.upgrade() else { break };
                        if let Err(e) = manager.reload_after_sync().await {
                            warn!(error = %e, "post-synchronization reload failed");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut slot = self.sync.lock().expect("sync attachment lock");
        if let Some(previous) = slot.take() {
            previous.listener.abort();
        }
        *slot = Some(SyncAttachment {
            orchestrator,
            listener,
        });
    }

    /// Stop listening for synchronization events and drop the orchestrator
    /// handle.
    pub fn detach_sync(&self) {
        if let Some(previous) = self.sync.lock().expect("sync attachment lock").take() {
            previous.listener.abort();
        }
    }

    // ---- Bundle lifecycle -------------------------------------------------

    /// Delete the bundle and every attachment, and drop the resident
    /// dataset. The cipher stays configured.
    pub async fn clear_local_data(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;

        for file in self.paths.list_local_files().await? {
            tokio::fs::remove_file(&file.path).await?;
        }
        state.dataset = None;
        info!("local data cleared");
        Ok(())
    }

    /// Load the existing bundle; fails if the file is missing.
    pub async fn open_bundle(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;
        self.load_locked(&mut state, false, cancel).await
    }

    /// Load the bundle, or create and persist a fresh seeded dataset when
    /// no file exists yet.
    pub async fn load_or_create_bundle(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;
        self.load_locked(&mut state, true, cancel).await
    }

    /// Persist the resident dataset, optionally queueing a synchronization
    /// run afterwards.
    pub async fn save_bundle(&self, synchronize: bool, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        self.save_swallowing(&state, cancel).await?;
        if synchronize {
            self.queue_sync();
        }
        Ok(())
    }

    // ---- Attachments ------------------------------------------------------

    /// Encrypt and store an opaque payload under `id`.
    pub async fn save_attachment(
        &self,
        id: Uuid,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let cipher = require_cipher(&state)?;
        require_dataset(&state)?;

        let ciphertext = cipher.encrypt(bytes)?;
        self.paths.ensure_root().await?;
        write_with_retry(&self.paths.attachment_path(id), &ciphertext, cancel).await?;
        self.queue_sync();
        Ok(())
    }

    pub async fn load_attachment(&self, id: Uuid, cancel: &CancellationToken) -> Result<Vec<u8>> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let cipher = require_cipher(&state)?;
        require_dataset(&state)?;

        let path = self.paths.attachment_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeyfortError::LoadFailure(format!("attachment {id} missing")));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(cipher.decrypt(&bytes)?)
    }

    /// Remove an attachment file; missing files are not an error.
    pub async fn delete_attachment(&self, id: Uuid, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        require_dataset(&state)?;

        match tokio::fs::remove_file(self.paths.attachment_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.queue_sync();
        Ok(())
    }

    // ---- Brown bag --------------------------------------------------------

    pub async fn brown_bag_get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let dataset = require_dataset(&state)?;
        Ok(dataset.brown_bag.get(key).cloned())
    }

    /// All entries whose key satisfies the predicate.
    pub async fn brown_bag_matching(
        &self,
        predicate: impl Fn(&str) -> bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, String)>> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let dataset = require_dataset(&state)?;
        Ok(dataset
            .brown_bag
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub async fn brown_bag_set(
        &self,
        key: &str,
        value: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;
        require_cipher(&state)?;
        let dataset = require_dataset_mut(&mut state)?;

        dataset
            .brown_bag
            .insert(key.to_string(), value.to_string());
        self.save_swallowing(&state, cancel).await?;
        self.queue_sync();
        Ok(())
    }

    // ---- Categories -------------------------------------------------------

    pub async fn add_category(
        &self,
        name: &str,
        icon: &str,
        cancel: &CancellationToken,
    ) -> Result<Category> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;
        require_cipher(&state)?;
        let dataset = require_dataset_mut(&mut state)?;

        let mut category = Category::new(name, icon);
        category.id = dataset.generate_unique_id();
        dataset.categories.push(category.clone());
        dataset.resort();

        self.save_swallowing(&state, cancel).await?;
        self.queue_sync();
        Ok(category)
    }

    pub async fn rename_category(
        &self,
        id: Uuid,
        new_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        if id == ALL_CATEGORY_ID {
            return Err(KeyfortError::InvalidOperation(
                "the reserved category cannot be renamed".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        require_cipher(&state)?;
        let dataset = require_dataset_mut(&mut state)?;

        let category = dataset
            .categories
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| KeyfortError::NotFound(format!("category {id}")))?;
        category.name = new_name.to_string();
        category.last_modified = Utc::now();
        dataset.resort();

        self.save_swallowing(&state, cancel).await?;
        self.queue_sync();
        Ok(())
    }

    /// Delete a category; its accounts move to the reserved category so
    /// every account keeps a valid reference.
    pub async fn delete_category(&self, id: Uuid, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        if id == ALL_CATEGORY_ID {
            return Err(KeyfortError::InvalidOperation(
                "the reserved category cannot be deleted".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        require_cipher(&state)?;
        let dataset = require_dataset_mut(&mut state)?;

        if dataset.category(id).is_none() {
            return Err(KeyfortError::NotFound(format!("category {id}")));
        }

        let now = Utc::now();
        for account in &mut dataset.accounts {
            if account.category_id == id {
                account.category_id = ALL_CATEGORY_ID;
                account.last_modified = now;
            }
        }
        dataset.categories.retain(|c| c.id != id);
        dataset.resort();

        self.save_swallowing(&state, cancel).await?;
        self.queue_sync();
        Ok(())
    }

    pub async fn get_category(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<Category>> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let dataset = require_dataset(&state)?;
        Ok(dataset.category(id).cloned())
    }

    pub async fn list_categories(&self, cancel: &CancellationToken) -> Result<Vec<Category>> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let dataset = require_dataset(&state)?;
        Ok(dataset.categories.clone())
    }

    // ---- Accounts ---------------------------------------------------------

    pub async fn add_account(
        &self,
        mut account: Account,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;
        require_cipher(&state)?;
        let dataset = require_dataset_mut(&mut state)?;

        if dataset.category(account.category_id).is_none() {
            return Err(KeyfortError::UnknownCategory(account.category_id));
        }
        if dataset.contains_id(account.id) {
            return Err(KeyfortError::InvalidOperation(format!(
                "id {} already in use",
                account.id
            )));
        }
        for data in &account.data {
            if dataset.contains_id(data.id()) {
                return Err(KeyfortError::InvalidOperation(format!(
                    "id {} already in use",
                    data.id()
                )));
            }
        }

        account.last_modified = Utc::now();
        dataset.accounts.push(account);
        dataset.resort();

        self.save_swallowing(&state, cancel).await?;
        self.queue_sync();
        Ok(())
    }

    pub async fn update_account(
        &self,
        mut account: Account,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;
        require_cipher(&state)?;
        let dataset = require_dataset_mut(&mut state)?;

        if dataset.category(account.category_id).is_none() {
            return Err(KeyfortError::UnknownCategory(account.category_id));
        }
        let position = dataset
            .accounts
            .iter()
            .position(|a| a.id == account.id)
            .ok_or_else(|| KeyfortError::NotFound(format!("account {}", account.id)))?;

        account.last_modified = Utc::now();
        dataset.accounts[position] = account;
        dataset.resort();

        self.save_swallowing(&state, cancel).await?;
        self.queue_sync();
        Ok(())
    }

    pub async fn delete_account(&self, id: Uuid, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;
        require_cipher(&state)?;
        let dataset = require_dataset_mut(&mut state)?;

        let position = dataset
            .accounts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| KeyfortError::NotFound(format!("account {id}")))?;

        let removed = dataset.accounts.remove(position);
        dataset.resort();

        self.save_swallowing(&state, cancel).await?;
        self.queue_sync();

        // Attachment payloads ride along with the account; drop their files.
        for data in &removed.data {
            if let crate::model::AccountData::FileAttachment { id, .. } = data {
                let path = self.paths.attachment_path(*id);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(error = %e, attachment = %id, "attachment cleanup failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Case-insensitive substring search over titles and searchable data
    /// fields, in canonical order.
    pub async fn search_accounts(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Account>> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let dataset = require_dataset(&state)?;
        Ok(dataset
            .accounts
            .iter()
            .filter(|a| a.matches(query))
            .cloned()
            .collect())
    }

    pub async fn get_account(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<Account>> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let dataset = require_dataset(&state)?;
        Ok(dataset.account(id).cloned())
    }

    pub async fn list_accounts(&self, cancel: &CancellationToken) -> Result<Vec<Account>> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let dataset = require_dataset(&state)?;
        Ok(dataset.accounts.clone())
    }

    /// A random id free across categories, accounts, and nested data.
    pub async fn generate_unique_id(&self, cancel: &CancellationToken) -> Result<Uuid> {
        ensure_active(cancel)?;
        let state = self.state.lock().await;
        let dataset = require_dataset(&state)?;
        Ok(dataset.generate_unique_id())
    }

    // ---- Internals --------------------------------------------------------

    /// Serialize, encrypt, and write the bundle. Retry exhaustion surfaces
    /// as a transient I/O error to the save boundary.
    async fn persist_locked(&self, state: &ManagerState, cancel: &CancellationToken) -> Result<()> {
        let cipher = require_cipher(state)?;
        let dataset = require_dataset(state)?;

        let plaintext = serde_json::to_vec(dataset)?;
        let ciphertext = cipher.encrypt(&plaintext)?;
        let framed = encode_bundle(CURRENT_BUNDLE_VERSION, &ciphertext);

        self.paths.ensure_root().await?;
        write_with_retry(&self.paths.bundle_path(), &framed, cancel).await
    }

    /// Save boundary: a save that still fails after retries is logged and
    /// swallowed so callers keep a usable in-memory store.
    async fn save_swallowing(&self, state: &ManagerState, cancel: &CancellationToken) -> Result<()> {
        match self.persist_locked(state, cancel).await {
            Ok(()) => Ok(()),
            Err(KeyfortError::TransientIo(e)) => {
                warn!(
                    error = %e,
                    "bundle save failed after retries; in-memory state remains authoritative"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn load_locked(
        &self,
        state: &mut ManagerState,
        create_if_missing: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let cipher = require_cipher(state)?;
        let bundle_path = self.paths.bundle_path();

        let bytes = match tokio::fs::read(&bundle_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if create_if_missing {
                    info!("no local bundle, creating a fresh dataset");
                    state.dataset = Some(Dataset::seeded());
                    return self.save_swallowing(state, cancel).await;
                }
                return Err(KeyfortError::LoadFailure(format!(
                    "bundle file missing: {}",
                    bundle_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if cancel.is_cancelled() {
            return Err(KeyfortError::Canceled);
        }

        let (version, ciphertext) = split_bundle(&bytes);
        let plaintext = cipher.decrypt(ciphertext)?;
        let loaded: Dataset = serde_json::from_slice(&plaintext)?;
        let loaded = self.upgrade.upgrade(loaded, version).await?;

        let merge_changed = match &mut state.dataset {
            Some(resident) => Some(merge_into(resident, loaded)),
            None => {
                let mut fresh = loaded;
                fresh.resort();
                state.dataset = Some(fresh);
                None
            }
        };

        if merge_changed == Some(true) {
            debug!("merge produced changes, re-persisting and re-queueing sync");
            self.save_swallowing(state, cancel).await?;
            self.queue_sync();
        }
        Ok(())
    }

    /// Invoked by the event listener after a download replaced the local
    /// bundle: reload the file and merge it into the resident dataset.
    async fn reload_after_sync(&self) -> Result<()> {
        let cancel = CancellationToken::new();
        let mut state = self.state.lock().await;
        if state.dataset.is_none() {
            // Nothing resident to merge into; the next open picks it up.
            return Ok(());
        }
        self.load_locked(&mut state, false, &cancel).await
    }

    fn queue_sync(&self) {
        let slot = self.sync.lock().expect("sync attachment lock");
        if let Some(attachment) = slot.as_ref() {
            Arc::clone(&attachment.orchestrator).queue_synchronization();
        }
    }
}

impl Drop for DataManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.sync.lock() {
            if let Some(attachment) = slot.take() {
                attachment.listener.abort();
            }
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(KeyfortError::Canceled);
    }
    Ok(())
}

fn require_cipher(state: &ManagerState) -> Result<Arc<dyn Cipher>> {
    state
        .cipher
        .clone()
        .ok_or_else(|| KeyfortError::InvalidState("encryption key not set".to_string()))
}

fn require_dataset(state: &ManagerState) -> Result<&Dataset> {
    state
        .dataset
        .as_ref()
        .ok_or_else(|| KeyfortError::InvalidState("no bundle loaded".to_string()))
}

fn require_dataset_mut(state: &mut ManagerState) -> Result<&mut Dataset> {
    state
        .dataset
        .as_mut()
        .ok_or_else(|| KeyfortError::InvalidState("no bundle loaded".to_string()))
}
