//! External-change watching for resources that may be edited outside the
//! application.
//!
//! # Threading
//!
//! The `notify` backend delivers events on its own thread; the callback only
//! forwards them over a channel. A dedicated dispatcher thread coalesces
//! bursts per path, waits for files that are momentarily absent (editors
//! that save through a temp file and rename it over the original), re-arms
//! watches the OS dropped, and finally hands the path to the change sink.
//! Waiting therefore never stalls the backend thread.

use crate::error::Result;
use crate::models::KeeperSettings;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Callback invoked with the full path of a watched file that changed.
pub type ChangeSink = Arc<dyn Fn(&Utf8Path) + Send + Sync>;

/// Timing knobs of the dispatcher thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchTiming {
    pub reappear_timeout: Duration,
    pub poll_interval: Duration,
    pub debounce: Duration,
}

impl From<&KeeperSettings> for WatchTiming {
    fn from(settings: &KeeperSettings) -> Self {
        Self {
            reappear_timeout: settings.reappear_timeout(),
            poll_interval: settings.reappear_poll_interval(),
            debounce: settings.debounce(),
        }
    }
}

impl Default for WatchTiming {
    fn default() -> Self {
        Self::from(&KeeperSettings::default())
    }
}

struct WatchState {
    backend: RecommendedWatcher,
    watched: BTreeSet<Utf8PathBuf>,
    suspended: Vec<Utf8PathBuf>,
}

struct Shared {
    state: Mutex<WatchState>,
    timing: WatchTiming,
    sink: ChangeSink,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_change(&self, path: &Utf8Path, rearm: bool) {
        let deadline = Instant::now() + self.timing.reappear_timeout;
        while !path.exists() && Instant::now() < deadline {
            thread::sleep(self.timing.poll_interval);
        }

        // Removed or renamed through the registry, which already unwatched it
        if !path.exists() {
            tracing::debug!("Ignoring stale change event for {}", path);
            return;
        }

        {
            let mut state = self.lock();
            if !state.watched.contains(path) {
                tracing::debug!("Ignoring change event for unwatched {}", path);
                return;
            }
            if rearm {
                // An atomic replace leaves the OS watch on the old inode
                let _ = state.backend.unwatch(path.as_std_path());
                if let Err(e) = state
                    .backend
                    .watch(path.as_std_path(), RecursiveMode::NonRecursive)
                {
                    tracing::warn!("Failed to re-arm watch on {}: {}", path, e);
                }
            }
        }

        tracing::debug!("External change detected: {}", path);
        (self.sink)(path);
    }
}

/// Watches the on-disk files of externally editable resources.
///
/// Holds the watch set plus a held-aside list used while watching is
/// suspended around bulk rewrites. Dropping the watcher stops the backend
/// and lets the dispatcher thread exit.
pub struct ExternalChangeWatcher {
    shared: Arc<Shared>,
}

impl ExternalChangeWatcher {
    /// Starts the backend and the dispatcher thread.
    ///
    /// # Errors
    /// Fails when the platform watcher cannot be initialized.
    pub fn new<F>(timing: WatchTiming, sink: F) -> Result<Self>
    where
        F: Fn(&Utf8Path) + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let backend = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Receiver only goes away once the watcher itself is dropped
            let _ = tx.send(res);
        })?;

        let shared = Arc::new(Shared {
            state: Mutex::new(WatchState {
                backend,
                watched: BTreeSet::new(),
                suspended: Vec::new(),
            }),
            timing,
            sink: Arc::new(sink),
        });

        let weak = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("bookfolder-watcher".to_string())
            .spawn(move || dispatch(rx, weak, timing))?;

        Ok(Self { shared })
    }

    /// Starts watching `path`. Idempotent. While suspended the path is
    /// queued and armed on [`resume`](Self::resume).
    pub fn watch(&self, path: &Utf8Path) -> Result<()> {
        let mut state = self.shared.lock();
        if state.watched.contains(path) || state.suspended.iter().any(|p| p == path) {
            return Ok(());
        }
        if !state.suspended.is_empty() {
            state.suspended.push(path.to_path_buf());
            return Ok(());
        }
        state
            .backend
            .watch(path.as_std_path(), RecursiveMode::NonRecursive)?;
        state.watched.insert(path.to_path_buf());
        tracing::debug!("Watching {}", path);
        Ok(())
    }

    /// Stops watching `path` and forgets it from the held-aside list.
    pub fn unwatch(&self, path: &Utf8Path) {
        let mut state = self.shared.lock();
        if state.watched.remove(path) {
            if let Err(e) = state.backend.unwatch(path.as_std_path()) {
                tracing::debug!("Unwatch of {} reported: {}", path, e);
            }
        }
        state.suspended.retain(|p| p != path);
    }

    pub fn is_watching(&self, path: &Utf8Path) -> bool {
        self.shared.lock().watched.contains(path)
    }

    /// Watched or held aside by a suspension.
    pub fn is_tracking(&self, path: &Utf8Path) -> bool {
        let state = self.shared.lock();
        state.watched.contains(path) || state.suspended.iter().any(|p| p == path)
    }

    pub fn watched_paths(&self) -> Vec<Utf8PathBuf> {
        self.shared.lock().watched.iter().cloned().collect()
    }

    pub fn suspended_paths(&self) -> Vec<Utf8PathBuf> {
        self.shared.lock().suspended.clone()
    }

    pub fn is_suspended(&self) -> bool {
        !self.shared.lock().suspended.is_empty()
    }

    /// Moves every watched path to the held-aside list and stops watching it.
    ///
    /// No-op while already suspended, so the original watch set is not lost.
    pub fn suspend(&self) {
        let mut state = self.shared.lock();
        if !state.suspended.is_empty() || state.watched.is_empty() {
            return;
        }
        let paths: Vec<Utf8PathBuf> = std::mem::take(&mut state.watched).into_iter().collect();
        for path in &paths {
            let _ = state.backend.unwatch(path.as_std_path());
        }
        tracing::debug!("Suspended watching {} files", paths.len());
        state.suspended = paths;
    }

    /// Re-arms every held-aside path that still exists, then clears the list.
    pub fn resume(&self) {
        let mut state = self.shared.lock();
        if state.suspended.is_empty() {
            return;
        }
        let paths = std::mem::take(&mut state.suspended);
        for path in paths {
            if !path.exists() {
                continue;
            }
            match state
                .backend
                .watch(path.as_std_path(), RecursiveMode::NonRecursive)
            {
                Ok(()) => {
                    state.watched.insert(path);
                }
                Err(e) => tracing::warn!("Failed to resume watching {}: {}", path, e),
            }
        }
        tracing::debug!("Resumed watching {} files", state.watched.len());
    }
}

/// Event kinds that can mean the content of a file changed.
fn is_content_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        _ => false,
    }
}

/// Event kinds after which the OS watch may be gone.
fn drops_watch(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

fn dispatch(
    rx: Receiver<notify::Result<Event>>,
    shared: Weak<Shared>,
    timing: WatchTiming,
) {
    // path -> (last event, watch possibly dropped)
    let mut pending: IndexMap<Utf8PathBuf, (Instant, bool)> = IndexMap::new();

    loop {
        let received = if pending.is_empty() {
            rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            rx.recv_timeout(timing.debounce)
        };

        match received {
            Ok(Ok(event)) if is_content_event(&event.kind) => {
                let rearm = drops_watch(&event.kind);
                for path in event.paths {
                    let Ok(path) = Utf8PathBuf::from_path_buf(path) else {
                        continue;
                    };
                    let entry = pending.entry(path).or_insert((Instant::now(), false));
                    entry.0 = Instant::now();
                    entry.1 |= rearm;
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Filesystem watcher error: {}", e),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        let due: Vec<(Utf8PathBuf, bool)> = pending
            .iter()
            .filter(|(_, (at, _))| now.duration_since(*at) >= timing.debounce)
            .map(|(path, (_, rearm))| (path.clone(), *rearm))
            .collect();

        for (path, rearm) in due {
            pending.shift_remove(&path);
            let Some(shared) = shared.upgrade() else {
                return;
            };
            shared.handle_change(&path, rearm);
        }
    }

    tracing::debug!("Watcher dispatcher stopped");
}
