//! App settings consumed by the synchronization layer.

use std::sync::RwLock;

/// Settings the orchestrator reads (and, on sign-in failure, writes).
pub trait SettingsStore: Send + Sync {
    fn sync_enabled(&self) -> bool;
    fn set_sync_enabled(&self, enabled: bool);

    /// Name of the selected remote provider, if any.
    fn provider_name(&self) -> Option<String>;
    fn set_provider_name(&self, name: Option<String>);
}

/// In-memory settings, used by hosts without a platform settings store and
/// throughout the test suite.
#[derive(Default)]
pub struct MemorySettings {
    inner: RwLock<State>,
}

#[derive(Default)]
struct State {
    sync_enabled: bool,
    provider_name: Option<String>,
}

impl MemorySettings {
    pub fn new(sync_enabled: bool, provider_name: Option<String>) -> Self {
        Self {
            inner: RwLock::new(State {
                sync_enabled,
                provider_name,
            }),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn sync_enabled(&self) -> bool {
        self.inner.read().expect("settings lock").sync_enabled
    }

    fn set_sync_enabled(&self, enabled: bool) {
        self.inner.write().expect("settings lock").sync_enabled = enabled;
    }

    fn provider_name(&self) -> Option<String> {
        self.inner.read().expect("settings lock").provider_name.clone()
    }

    fn set_provider_name(&self, name: Option<String>) {
        self.inner.write().expect("settings lock").provider_name = name;
    }
}
