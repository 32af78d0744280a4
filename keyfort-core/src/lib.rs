//! KeyFort Core Library
//!
//! Authoritative local store for KeyFort secrets, kept consistent across
//! devices through an optimistically-synchronized remote backend. Provides
//! the gated data manager, the synchronization orchestrator, and the
//! last-writer-wins merge engine, plus the crypto and storage plumbing
//! they sit on.

pub mod crypto;
pub mod manager;
pub mod merge;
pub mod model;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod upgrade;

pub use crypto::{AesGcmCipher, Cipher, CryptoError, SecretString};
pub use manager::DataManager;
pub use model::{Account, AccountData, Category, Dataset, ALL_CATEGORY_ID};
pub use settings::{MemorySettings, SettingsStore};
pub use storage::{StorePaths, BUNDLE_FILE_NAME, CURRENT_BUNDLE_VERSION};
pub use sync::{
    AlwaysOnline, ConnectivityProbe, RemoteFileInfo, RemoteStorage, SyncEvent, SyncOrchestrator,
};
pub use upgrade::{StandardUpgrade, UpgradeService};

use thiserror::Error;

/// Result type for KeyFort core operations
pub type Result<T> = std::result::Result<T, KeyfortError>;

/// General error type for KeyFort core operations
#[derive(Error, Debug)]
pub enum KeyfortError {
    /// Operation requires a loaded bundle or an initialized cipher.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Structural change that is never permitted (e.g. touching the
    /// reserved category).
    #[error("operation not permitted: {0}")]
    InvalidOperation(String),

    /// An account referenced a category that does not exist.
    #[error("unknown category: {0}")]
    UnknownCategory(uuid::Uuid),

    /// An expected file was missing or unreadable.
    #[error("load failure: {0}")]
    LoadFailure(String),

    /// Retryable filesystem error; surfaced only after retries are spent.
    #[error("I/O error: {0}")]
    TransientIo(#[from] std::io::Error),

    /// The operation observed its cancellation signal and unwound.
    #[error("operation canceled")]
    Canceled,

    /// Non-interactive remote sign-in failed.
    #[error("remote sign-in failed")]
    Unauthenticated,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
