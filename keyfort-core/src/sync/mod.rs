//! Device synchronization against a remote file store.
//!
//! One orchestrator per store. Runs are coalesced and serialized; direction
//! (upload vs. download) is decided by comparing the remote bundle's
//! timestamp against the local file's modification time. Outcomes are
//! reported exclusively through [`SyncEvent`]s; nothing here throws to the
//! caller.

mod orchestrator;
mod remote;

pub use orchestrator::SyncOrchestrator;
pub use remote::{AlwaysOnline, ConnectivityProbe, RemoteFileInfo, RemoteStorage};

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    Completed {
        succeeded: bool,
        /// The run replaced the local bundle with a remote copy; the data
        /// manager must reload and merge.
        requires_reload: bool,
    },
}
