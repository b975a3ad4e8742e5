use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the registry and its external-change watcher from `bookfolder.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeeperSettings {
    /// How long a changed file may stay absent (editors that save through a
    /// temp file and rename) before the change event is treated as stale.
    #[serde(rename = "Reappear Timeout Ms", default = "default_reappear_timeout_ms")]
    pub reappear_timeout_ms: u64,

    #[serde(rename = "Reappear Poll Ms", default = "default_reappear_poll_ms")]
    pub reappear_poll_ms: u64,

    /// Quiet period that coalesces a burst of events for one path.
    #[serde(rename = "Debounce Ms", default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Create a legacy NCX for EPUB 3 packages too.
    #[serde(rename = "NCX For EPUB3", default)]
    pub ncx_for_epub3: bool,

    #[serde(rename = "Broadcast Capacity", default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl KeeperSettings {
    pub fn reappear_timeout(&self) -> Duration {
        Duration::from_millis(self.reappear_timeout_ms)
    }

    pub fn reappear_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reappear_poll_ms.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for KeeperSettings {
    fn default() -> Self {
        Self {
            reappear_timeout_ms: default_reappear_timeout_ms(),
            reappear_poll_ms: default_reappear_poll_ms(),
            debounce_ms: default_debounce_ms(),
            ncx_for_epub3: false,
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

fn default_reappear_timeout_ms() -> u64 {
    1000
}

fn default_reappear_poll_ms() -> u64 {
    50
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_broadcast_capacity() -> usize {
    100
}
