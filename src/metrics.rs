// Registry metrics module
//
// Provides lightweight counters for monitoring registry activity

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Registry activity counters
///
/// Uses atomic operations for thread-safe tracking without locks. One
/// instance is shared by a registry and every clone of it; the owning
/// document can log it on close for a summary of the session.
#[derive(Debug)]
pub struct Metrics {
    /// Files registered through `add_file` and the document constructors
    pub files_added: AtomicU64,

    /// Resources removed, singly or in bulk
    pub files_removed: AtomicU64,

    pub files_renamed: AtomicU64,

    pub files_moved: AtomicU64,

    /// Rename, move or remove items rejected inside a bulk operation
    pub operations_rejected: AtomicU64,

    /// Copies that failed and were rolled back
    pub copy_failures: AtomicU64,

    /// External-change notifications delivered to a resource
    pub external_changes: AtomicU64,

    /// Short-name recomputations over the whole tree
    pub short_name_refreshes: AtomicU64,

    /// Change events sent on the broadcast channel
    pub change_broadcasts: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self {
            files_added: AtomicU64::new(0),
            files_removed: AtomicU64::new(0),
            files_renamed: AtomicU64::new(0),
            files_moved: AtomicU64::new(0),
            operations_rejected: AtomicU64::new(0),
            copy_failures: AtomicU64::new(0),
            external_changes: AtomicU64::new(0),
            short_name_refreshes: AtomicU64::new(0),
            change_broadcasts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_file_added(&self) {
        self.files_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_removed(&self) {
        self.files_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_renamed(&self) {
        self.files_renamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_moved(&self) {
        self.files_moved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.operations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy_failure(&self) {
        self.copy_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_external_change(&self) {
        self.external_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_short_name_refresh(&self) {
        self.short_name_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_change_broadcast(&self) {
        self.change_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get time since the registry was opened
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Registry Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Files: {} added, {} removed, {} renamed, {} moved",
            self.files_added.load(Ordering::Relaxed),
            self.files_removed.load(Ordering::Relaxed),
            self.files_renamed.load(Ordering::Relaxed),
            self.files_moved.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Rejected bulk items: {}, copy failures: {}",
            self.operations_rejected.load(Ordering::Relaxed),
            self.copy_failures.load(Ordering::Relaxed)
        );
        tracing::info!(
            "External changes: {}, short-name refreshes: {}, broadcasts: {}",
            self.external_changes.load(Ordering::Relaxed),
            self.short_name_refreshes.load(Ordering::Relaxed),
            self.change_broadcasts.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
