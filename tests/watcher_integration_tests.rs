//! Integration tests for external-change watching
//!
//! These tests drive real filesystem events through the `notify` backend and
//! verify that:
//! - Edits to watched files reach the registry as `ResourceChangedOnDisk`
//! - Cached text is dropped so the next read sees the edit
//! - Suspended watches stay silent until resumed
//! - Stale events for vanished files are dropped
//! - Watches follow renames and survive atomic replacement

use bookfolder::services::{ExternalChangeWatcher, WatchTiming};
use bookfolder::{
    AddFileOptions, KeeperSettings, MediaTypeTable, RegistryChange, ResourceHandle,
    ResourceRegistry,
};
use camino::Utf8PathBuf;
use std::fs;
use std::sync::Arc;
use std::sync::mpsc;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

fn fast_settings() -> KeeperSettings {
    KeeperSettings {
        reappear_timeout_ms: 200,
        reappear_poll_ms: 10,
        debounce_ms: 20,
        ..KeeperSettings::default()
    }
}

fn create_registry() -> ResourceRegistry {
    ResourceRegistry::new(Arc::new(MediaTypeTable::default()), fast_settings()).unwrap()
}

fn add_source(registry: &ResourceRegistry, dir: &TempDir, name: &str, contents: &str) -> ResourceHandle {
    let path = Utf8PathBuf::try_from(dir.path().join(name)).unwrap();
    fs::write(&path, contents).unwrap();
    registry.add_file(&path, AddFileOptions::default()).unwrap()
}

/// Waits for the disk-change event of `resource`, skipping unrelated events.
async fn next_disk_change(
    rx: &mut broadcast::Receiver<RegistryChange>,
    wait: Duration,
) -> Option<String> {
    let result = timeout(wait, async {
        loop {
            match rx.recv().await {
                Ok(RegistryChange::ResourceChangedOnDisk { book_path, .. }) => return Some(book_path),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;
    result.ok().flatten()
}

#[tokio::test]
async fn test_external_edit_reaches_subscribers() {
    let sources = TempDir::new().unwrap();
    let registry = create_registry();
    let css = add_source(&registry, &sources, "style.css", "p { color: red }");
    assert_eq!(css.text().unwrap().as_deref(), Some("p { color: red }"));

    registry.watch_resource_file(&css).unwrap();
    assert!(registry.is_watching(&css));
    let mut rx = registry.subscribe();

    fs::write(css.full_path(), "p { color: blue }").unwrap();

    let changed = next_disk_change(&mut rx, Duration::from_secs(5)).await;
    assert_eq!(changed.as_deref(), Some("OEBPS/Styles/style.css"));
    assert_eq!(css.text().unwrap().as_deref(), Some("p { color: blue }"));
    assert!(
        registry
            .metrics()
            .external_changes
            .load(std::sync::atomic::Ordering::Relaxed)
            >= 1
    );
}

#[tokio::test]
async fn test_suspended_watch_is_silent_until_resumed() {
    let sources = TempDir::new().unwrap();
    let registry = create_registry();
    let page = add_source(&registry, &sources, "page.xhtml", "<html/>");
    registry.watch_resource_file(&page).unwrap();
    let mut rx = registry.subscribe();

    registry.suspend_watching();
    assert!(!registry.is_watching(&page));
    fs::write(page.full_path(), "<html>rewritten</html>").unwrap();
    assert_eq!(next_disk_change(&mut rx, Duration::from_millis(500)).await, None);

    registry.resume_watching();
    assert!(registry.is_watching(&page));
    fs::write(page.full_path(), "<html>edited</html>").unwrap();
    assert_eq!(
        next_disk_change(&mut rx, Duration::from_secs(5)).await.as_deref(),
        Some("OEBPS/Text/page.xhtml")
    );
}

#[test]
fn test_binary_only_types_are_not_watched() {
    let sources = TempDir::new().unwrap();
    let registry = create_registry();
    let font = add_source(&registry, &sources, "serif.otf", "font");

    registry.watch_resource_file(&font).unwrap();
    assert!(!registry.is_watching(&font));
}

#[tokio::test]
async fn test_watch_follows_rename() {
    let sources = TempDir::new().unwrap();
    let registry = create_registry();
    let css = add_source(&registry, &sources, "old.css", "a {}");
    registry.watch_resource_file(&css).unwrap();

    registry.rename_resource(&css, "new.css").unwrap();
    assert!(registry.is_watching(&css));
    let mut rx = registry.subscribe();

    fs::write(css.full_path(), "b {}").unwrap();
    assert_eq!(
        next_disk_change(&mut rx, Duration::from_secs(5)).await.as_deref(),
        Some("OEBPS/Styles/new.css")
    );
}

#[tokio::test]
async fn test_removed_resource_is_unwatched() {
    let sources = TempDir::new().unwrap();
    let registry = create_registry();
    let css = add_source(&registry, &sources, "gone.css", "");
    registry.watch_resource_file(&css).unwrap();
    let mut rx = registry.subscribe();

    registry.remove_resource(&css).unwrap();
    assert!(!registry.is_watching(&css));
    assert_eq!(next_disk_change(&mut rx, Duration::from_millis(500)).await, None);
}

#[test]
fn test_stale_event_is_dropped() {
    let dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(dir.path().join("temp.xhtml")).unwrap();
    fs::write(&path, "x").unwrap();

    let (tx, rx) = mpsc::channel();
    let timing = WatchTiming {
        reappear_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
        debounce: Duration::from_millis(20),
    };
    let watcher = ExternalChangeWatcher::new(timing, move |changed| {
        let _ = tx.send(changed.to_path_buf());
    })
    .unwrap();
    watcher.watch(&path).unwrap();

    fs::remove_file(&path).unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
}

#[cfg(target_os = "linux")]
#[test]
fn test_watch_survives_atomic_replace() {
    let dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(dir.path().join("chapter.xhtml")).unwrap();
    let temp = Utf8PathBuf::try_from(dir.path().join(".chapter.xhtml.swp")).unwrap();
    fs::write(&path, "v1").unwrap();

    let (tx, rx) = mpsc::channel();
    let watcher = ExternalChangeWatcher::new(WatchTiming::from(&fast_settings()), move |changed| {
        let _ = tx.send(changed.to_path_buf());
    })
    .unwrap();
    watcher.watch(&path).unwrap();

    // Editor-style save: write a sibling then rename it over the original
    fs::write(&temp, "v2").unwrap();
    fs::rename(&temp, &path).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), path);

    // The watch was re-armed on the new file
    while rx.recv_timeout(Duration::from_millis(200)).is_ok() {}
    fs::write(&path, "v3").unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), path);
}
