//! The resource registry: the authoritative index of every file in the
//! working folder of an unpacked book.
//!
//! [`ResourceRegistry`] owns all [`Resource`]s, the group-to-folder map and
//! the external-change watch set. It is cheap to clone (all state lives
//! behind one `Arc`) and safe to share between an import pipeline's worker
//! threads and the thread that owns the document model.
//!
//! # Locking
//!
//! - One `RwLock` guards both indexes and the document singletons.
//! - One `Mutex` serializes name reservation: it is held from computing a
//!   unique filename against the committed names through inserting the new
//!   resource, so two concurrent adds can never claim the same name. Renames
//!   and moves take it too.
//! - One `Mutex` serializes short-name refreshes, so the last refresh to run
//!   always applies labels computed from the latest paths.
//! - Observer calls and broadcasts happen after every index lock is released.

mod observer;

pub use observer::PackageObserver;

use crate::error::{KeeperError, Result};
use crate::metrics::Metrics;
use crate::models::resource::filename_of;
use crate::models::{
    FileIcon, Group, KeeperSettings, MediaTypeTable, NAVIGATION_MEDIA_TYPE, PACKAGE_MEDIA_TYPE,
    Resource, ResourceHandle, ResourceId, ResourceKind, ResourceType,
};
use crate::services::folders::{
    build_relative_path, join_book_path, starting_dir, GroupFolders, STD_NAVIGATION_PATH,
    STD_PACKAGE_PATH,
};
use crate::services::templates::{
    default_ncx, write_container_xml, FIRST_SECTION_FILENAME, NAVIGATION_FILENAME,
    PACKAGE_FILENAME,
};
use crate::services::{
    classify_group, compute_short_names, is_metadata_path, make_unique, resolve_media_type,
    ExternalChangeWatcher, WatchTiming, METADATA_DIR,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::sync::{
    Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Change events emitted when the registry is modified
///
/// The owning document controller subscribes to these; in particular
/// `ResourceChangedOnDisk` is its cue to mark the document modified.
#[derive(Clone, Debug, PartialEq)]
pub enum RegistryChange {
    ResourceAdded {
        id: ResourceId,
        book_path: String,
    },

    ResourceRemoved {
        id: ResourceId,
        book_path: String,
    },

    ResourceRenamed {
        id: ResourceId,
        old_book_path: String,
        new_book_path: String,
    },

    ResourceMoved {
        id: ResourceId,
        old_book_path: String,
        new_book_path: String,
    },

    /// Short names were recomputed and `changed` of them differ
    ShortNamesUpdated {
        changed: usize,
    },

    /// A watched file was modified by another program
    ResourceChangedOnDisk {
        id: ResourceId,
        book_path: String,
    },
}

/// Options for [`ResourceRegistry::add_file`].
#[derive(Debug, Clone)]
pub struct AddFileOptions {
    /// Media type declared by the caller, usually from the manifest.
    pub media_type: Option<String>,

    /// Exact destination, used verbatim when reconstructing an unpacked
    /// archive. Takes precedence over `folder`.
    pub book_path: Option<String>,

    /// Destination folder; the group's default folder when `None`.
    pub folder: Option<String>,

    /// Tell the package observer and refresh short names. Bulk importers
    /// turn this off and refresh once at the end.
    pub notify: bool,
}

impl Default for AddFileOptions {
    fn default() -> Self {
        Self {
            media_type: None,
            book_path: None,
            folder: None,
            notify: true,
        }
    }
}

impl AddFileOptions {
    /// Options for bulk import: no observer call, no short-name refresh.
    pub fn silent() -> Self {
        Self {
            notify: false,
            ..Self::default()
        }
    }
}

/// Result of a bulk rename, move or remove.
///
/// Rejected items are left exactly as they were; the rest of the batch
/// still goes through.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub completed: Vec<ResourceHandle>,
    pub rejected: Vec<(ResourceHandle, KeeperError)>,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[derive(Default)]
struct ResourceIndex {
    by_id: IndexMap<ResourceId, ResourceHandle>,
    by_path: HashMap<String, ResourceHandle>,
    package: Option<ResourceHandle>,
    navigation: Option<ResourceHandle>,
}

impl ResourceIndex {
    fn insert(&mut self, resource: &ResourceHandle) {
        self.by_id.insert(resource.id().clone(), Arc::clone(resource));
        self.by_path.insert(resource.book_path(), Arc::clone(resource));
    }

    fn remove(&mut self, resource: &Resource) -> bool {
        if self.by_id.shift_remove(resource.id()).is_none() {
            return false;
        }
        self.by_path.remove(&resource.book_path());
        if self.package.as_ref().is_some_and(|p| p.id() == resource.id()) {
            self.package = None;
        }
        if self.navigation.as_ref().is_some_and(|n| n.id() == resource.id()) {
            self.navigation = None;
        }
        true
    }

    fn is_package(&self, resource: &Resource) -> bool {
        self.package.as_ref().is_some_and(|p| p.id() == resource.id())
    }
}

struct RegistryInner {
    main_folder: Utf8PathBuf,
    media_types: Arc<MediaTypeTable>,
    settings: KeeperSettings,
    index: RwLock<ResourceIndex>,
    reservation: Mutex<()>,
    short_names: Mutex<()>,
    folders: RwLock<GroupFolders>,
    icon_cache: RwLock<HashMap<String, FileIcon>>,
    observer: RwLock<Option<Arc<dyn PackageObserver>>>,
    watcher: ExternalChangeWatcher,
    change_tx: broadcast::Sender<RegistryChange>,
    metrics: Arc<Metrics>,
    // Declared last so the folder outlives everything that points into it
    _temp_dir: Option<TempDir>,
}

impl RegistryInner {
    fn read_index(&self) -> RwLockReadGuard<'_, ResourceIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, ResourceIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn observer(&self) -> Option<Arc<dyn PackageObserver>> {
        self.observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn broadcast(&self, change: RegistryChange) {
        // Ignore send errors - it's OK if no one is listening
        let _ = self.change_tx.send(change);
        self.metrics.record_change_broadcast();
    }

    fn cache_icon(&self, media_type: &str) {
        self.icon_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(media_type.to_string())
            .or_insert_with(|| FileIcon::for_media_type(media_type));
    }

    /// Sink of the external-change watcher.
    fn resource_file_changed(&self, full_path: &Utf8Path) {
        let resource = self
            .read_index()
            .by_id
            .values()
            .find(|r| r.full_path() == full_path)
            .cloned();

        let Some(resource) = resource else {
            tracing::debug!("Changed file {} belongs to no resource", full_path);
            return;
        };

        resource.file_changed_on_disk();
        self.metrics.record_external_change();
        self.broadcast(RegistryChange::ResourceChangedOnDisk {
            id: resource.id().clone(),
            book_path: resource.book_path(),
        });
    }
}

/// Thread-safe registry of the files in a book's working folder
///
/// # Usage
///
/// - [`add_file`](Self::add_file) copies a file in and registers it
/// - [`rename_resource`](Self::rename_resource) / [`move_resource`](Self::move_resource)
///   and their bulk forms relocate files in place
/// - [`set_package_observer`](Self::set_package_observer) wires the package
///   document's manifest to every mutation
/// - [`subscribe`](Self::subscribe) listens for [`RegistryChange`] events
#[derive(Clone)]
pub struct ResourceRegistry {
    inner: Arc<RegistryInner>,
}

impl ResourceRegistry {
    /// Create a registry over a fresh temporary working folder that is
    /// deleted when the last clone of the registry is dropped.
    pub fn new(media_types: Arc<MediaTypeTable>, settings: KeeperSettings) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let main_folder = Self::normalize_folder(temp_dir.path())?;
        Self::build(main_folder, media_types, settings, Some(temp_dir))
    }

    /// Create a registry over an existing working folder, creating it if
    /// needed. The folder is left in place on drop.
    pub fn with_main_folder<P: AsRef<Utf8Path>>(
        main_folder: P,
        media_types: Arc<MediaTypeTable>,
        settings: KeeperSettings,
    ) -> Result<Self> {
        let main_folder = main_folder.as_ref();
        fs::create_dir_all(main_folder)?;
        let main_folder = Self::normalize_folder(main_folder.as_std_path())?;
        Self::build(main_folder, media_types, settings, None)
    }

    fn normalize_folder(path: &std::path::Path) -> Result<Utf8PathBuf> {
        let canonical = fs::canonicalize(path)?;
        Utf8PathBuf::from_path_buf(canonical)
            .map_err(|p| KeeperError::NonUtf8Path(p.to_string_lossy().into_owned()))
    }

    fn build(
        main_folder: Utf8PathBuf,
        media_types: Arc<MediaTypeTable>,
        settings: KeeperSettings,
        temp_dir: Option<TempDir>,
    ) -> Result<Self> {
        let link: Arc<OnceLock<Weak<RegistryInner>>> = Arc::new(OnceLock::new());
        let sink_link = Arc::clone(&link);
        let watcher = ExternalChangeWatcher::new(WatchTiming::from(&settings), move |path| {
            if let Some(inner) = sink_link.get().and_then(Weak::upgrade) {
                inner.resource_file_changed(path);
            }
        })?;

        let (change_tx, _) = broadcast::channel(settings.broadcast_capacity.max(1));

        let inner = Arc::new(RegistryInner {
            main_folder,
            media_types,
            settings,
            index: RwLock::new(ResourceIndex::default()),
            reservation: Mutex::new(()),
            short_names: Mutex::new(()),
            folders: RwLock::new(GroupFolders::standard()),
            icon_cache: RwLock::new(HashMap::new()),
            observer: RwLock::new(None),
            watcher,
            change_tx,
            metrics: Arc::new(Metrics::new()),
            _temp_dir: temp_dir,
        });
        let _ = link.set(Arc::downgrade(&inner));

        tracing::debug!("Resource registry opened on {}", inner.main_folder);
        Ok(Self { inner })
    }

    /// Wire the package document's manifest to registry mutations
    pub fn set_package_observer(&self, observer: Arc<dyn PackageObserver>) {
        *self
            .inner
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    pub fn clear_package_observer(&self) {
        *self
            .inner
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Subscribe to registry change events
    ///
    /// Returns a receiver that will get notified of all future changes.
    /// Multiple subscribers can listen simultaneously.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.inner.change_tx.subscribe()
    }

    /// Absolute path of the working folder; never ends with a separator.
    pub fn main_folder(&self) -> &Utf8Path {
        &self.inner.main_folder
    }

    pub fn media_types(&self) -> &MediaTypeTable {
        &self.inner.media_types
    }

    pub fn settings(&self) -> &KeeperSettings {
        &self.inner.settings
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.inner.metrics)
    }

    // ---------------------------------------------------------------------
    // Adding
    // ---------------------------------------------------------------------

    /// Copy a file into the working folder and register it.
    ///
    /// # Arguments
    /// * `source` - File to import; may already sit at its destination
    /// * `options` - Declared media type, destination and notification policy
    ///
    /// # Errors
    /// * `FileNotFound` - `source` does not exist; nothing is registered
    /// * `PathConflict` - an explicit `book_path` is already registered
    /// * `CopyFailed` - the copy failed; the registration is rolled back
    pub fn add_file<P: AsRef<Utf8Path>>(
        &self,
        source: P,
        options: AddFileOptions,
    ) -> Result<ResourceHandle> {
        let source = source.as_ref();
        let source = source
            .canonicalize_utf8()
            .map_err(|_| KeeperError::FileNotFound(source.to_path_buf()))?;

        let table = &self.inner.media_types;
        let media_type = resolve_media_type(table, source.as_str(), options.media_type.as_deref());
        let group = classify_group(table, source.as_str(), &media_type);
        let metadata = is_metadata_path(source.as_str());
        let resource_type = if metadata {
            ResourceType::Generic
        } else {
            table
                .resource_type_for_media_type(&media_type)
                .unwrap_or(ResourceType::Generic)
        };
        let epub_version = self.package_version();

        let resource = {
            let _reservation = self
                .inner
                .reservation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let book_path = if metadata {
                self.metadata_book_path(&source)
            } else if let Some(book_path) = options.book_path {
                book_path
            } else {
                let filename = source.file_name().unwrap_or(source.as_str());
                let filename = filename.strip_prefix('.').unwrap_or(filename);
                let unique = {
                    let index = self.inner.read_index();
                    make_unique(
                        filename,
                        index.by_path.keys().map(String::as_str).map(filename_of),
                    )
                };
                let folder = options
                    .folder
                    .unwrap_or_else(|| self.default_folder_for_group(group));
                join_book_path(&folder, &unique)
            };

            let resource = Arc::new(Resource::new(
                &self.inner.main_folder,
                book_path.clone(),
                ResourceKind::for_type(resource_type, &epub_version),
                media_type.clone(),
                group,
                epub_version,
            ));

            let mut index = self.inner.write_index();
            if index.by_path.contains_key(&book_path) {
                return Err(KeeperError::PathConflict(book_path));
            }
            index.insert(&resource);
            resource
        };

        let destination = resource.full_path();
        if let Err(error) = copy_into_place(&source, &destination) {
            self.inner.write_index().remove(&resource);
            resource.mark_removed();
            if source != destination {
                let _ = fs::remove_file(&destination);
            }
            self.inner.metrics.record_copy_failure();
            tracing::warn!("Rolled back {} after failed copy: {}", resource.book_path(), error);
            return Err(KeeperError::CopyFailed {
                source_path: source,
                destination,
                error,
            });
        }

        self.inner.cache_icon(&media_type);
        self.inner.metrics.record_file_added();
        tracing::debug!(
            "Registered {} as {} ({})",
            resource.book_path(),
            media_type,
            group
        );

        self.inner.broadcast(RegistryChange::ResourceAdded {
            id: resource.id().clone(),
            book_path: resource.book_path(),
        });

        if options.notify {
            if let Some(observer) = self.inner.observer() {
                observer.resource_added(&resource);
            }
            self.update_short_path_names();
        }

        Ok(resource)
    }

    /// Book path of a file from the metadata directory: where it already sits
    /// inside the working folder, or from the metadata segment on.
    fn metadata_book_path(&self, source: &Utf8Path) -> String {
        if let Ok(relative) = source.strip_prefix(&self.inner.main_folder) {
            return relative.as_str().replace('\\', "/");
        }
        match source.as_str().find(METADATA_DIR) {
            Some(pos) => source.as_str()[pos..].replace('\\', "/"),
            None => join_book_path(METADATA_DIR, source.file_name().unwrap_or_default()),
        }
    }

    fn package_version(&self) -> String {
        self.inner
            .read_index()
            .package
            .as_ref()
            .and_then(|p| p.document_version().map(str::to_string))
            .unwrap_or_default()
    }

    /// Create the package document and point `META-INF/container.xml` at it.
    ///
    /// # Arguments
    /// * `version` - Package format version, e.g. `"2.0"` or `"3.0"`
    /// * `book_path` - Explicit location; `<opf folder>/content.opf` when `None`
    ///
    /// An existing file at the location is kept; otherwise an empty one is
    /// created for the package document to fill.
    pub fn add_package_document(
        &self,
        version: &str,
        book_path: Option<&str>,
    ) -> Result<ResourceHandle> {
        let book_path = match book_path {
            Some(book_path) => book_path.to_string(),
            None => join_book_path(&self.default_folder_for_group(Group::Opf), PACKAGE_FILENAME),
        };

        let resource = {
            let _reservation = self
                .inner
                .reservation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut index = self.inner.write_index();
            if let Some(existing) = &index.package {
                return Err(KeeperError::PackageDocumentExists(existing.book_path()));
            }
            if index.by_path.contains_key(&book_path) {
                return Err(KeeperError::PathConflict(book_path));
            }

            let full_path = self.inner.main_folder.join(&book_path);
            ensure_file(&full_path, "")?;

            let resource = Arc::new(Resource::new(
                &self.inner.main_folder,
                book_path.clone(),
                ResourceKind::for_type(ResourceType::PackageDocument, version),
                PACKAGE_MEDIA_TYPE.to_string(),
                Group::Opf,
                version.to_string(),
            ));
            index.insert(&resource);
            index.package = Some(Arc::clone(&resource));
            resource
        };

        write_container_xml(&self.inner.main_folder, &book_path)?;
        self.inner.cache_icon(PACKAGE_MEDIA_TYPE);
        self.inner.metrics.record_file_added();
        tracing::info!("Created package document {} (version {})", book_path, version);

        self.inner.broadcast(RegistryChange::ResourceAdded {
            id: resource.id().clone(),
            book_path,
        });
        self.update_short_path_names();
        Ok(resource)
    }

    /// Create the legacy NCX navigation document.
    ///
    /// # Arguments
    /// * `version` - Package format version
    /// * `book_path` - Explicit location; `<ncx folder>/toc.ncx` when `None`
    /// * `text_folder` - Folder of the first section the boilerplate links
    ///   to; the Text group's default folder when `None`
    ///
    /// # Returns
    /// `None` for EPUB 3 packages unless `ncx_for_epub3` is set.
    pub fn add_navigation_document(
        &self,
        version: &str,
        book_path: Option<&str>,
        text_folder: Option<&str>,
    ) -> Result<Option<ResourceHandle>> {
        if version.starts_with('3') && !self.inner.settings.ncx_for_epub3 {
            tracing::debug!("No NCX for version {} package", version);
            return Ok(None);
        }

        let book_path = match book_path {
            Some(book_path) => book_path.to_string(),
            None => join_book_path(&self.default_folder_for_group(Group::Ncx), NAVIGATION_FILENAME),
        };
        let text_folder = match text_folder {
            Some(folder) => folder.to_string(),
            None => self.default_folder_for_group(Group::Text),
        };
        let first_section = build_relative_path(
            &book_path,
            &join_book_path(&text_folder, FIRST_SECTION_FILENAME),
        );
        let main_id = match self.inner.observer() {
            Some(observer) => observer.main_identifier(),
            None => format!("urn:uuid:{}", uuid::Uuid::new_v4()),
        };

        let resource = {
            let _reservation = self
                .inner
                .reservation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut index = self.inner.write_index();
            if let Some(existing) = &index.navigation {
                return Err(KeeperError::NavigationDocumentExists(existing.book_path()));
            }
            if index.by_path.contains_key(&book_path) {
                return Err(KeeperError::PathConflict(book_path));
            }

            let full_path = self.inner.main_folder.join(&book_path);
            ensure_file(&full_path, &default_ncx(&first_section, &main_id))?;

            let resource = Arc::new(Resource::new(
                &self.inner.main_folder,
                book_path.clone(),
                ResourceKind::for_type(ResourceType::Navigation, version),
                NAVIGATION_MEDIA_TYPE.to_string(),
                Group::Ncx,
                version.to_string(),
            ));
            resource.set_main_identifier(&main_id);
            index.insert(&resource);
            index.navigation = Some(Arc::clone(&resource));
            resource
        };

        self.inner.cache_icon(NAVIGATION_MEDIA_TYPE);
        self.inner.metrics.record_file_added();
        tracing::info!("Created navigation document {} (version {})", book_path, version);

        self.inner.broadcast(RegistryChange::ResourceAdded {
            id: resource.id().clone(),
            book_path,
        });
        self.update_short_path_names();
        Ok(Some(resource))
    }

    /// Remove the navigation document if there is one.
    pub fn remove_navigation_document(&self) -> Result<()> {
        match self.navigation_document() {
            Some(navigation) => self.remove_resource(&navigation),
            None => Ok(()),
        }
    }

    // ---------------------------------------------------------------------
    // Removing
    // ---------------------------------------------------------------------

    /// Unregister a resource, stop watching it and delete its file.
    ///
    /// The package observer is told before the file is deleted.
    pub fn remove_resource(&self, resource: &ResourceHandle) -> Result<()> {
        if !self.inner.write_index().remove(resource) {
            return Err(KeeperError::ResourceNotFound(resource.book_path()));
        }
        self.inner.watcher.unwatch(&resource.full_path());

        if let Some(observer) = self.inner.observer() {
            observer.resource_removed(resource);
        }

        let deleted = resource.delete();
        self.finish_removal(resource);
        self.update_short_path_names();
        deleted.map_err(KeeperError::from)
    }

    /// Remove many resources, telling the package observer once for the
    /// whole batch before any file is deleted.
    pub fn bulk_remove_resources(&self, resources: &[ResourceHandle]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        let mut removed = Vec::with_capacity(resources.len());
        {
            let mut index = self.inner.write_index();
            for resource in resources {
                if index.remove(resource) {
                    removed.push(Arc::clone(resource));
                } else {
                    outcome.rejected.push((
                        Arc::clone(resource),
                        KeeperError::ResourceNotFound(resource.book_path()),
                    ));
                }
            }
        }

        if !removed.is_empty() {
            if let Some(observer) = self.inner.observer() {
                observer.resources_removed(&removed);
            }
        }

        for resource in removed {
            self.inner.watcher.unwatch(&resource.full_path());
            if let Err(e) = resource.delete() {
                tracing::warn!("Failed to delete {}: {}", resource.full_path(), e);
            }
            self.finish_removal(&resource);
            outcome.completed.push(resource);
        }

        for (resource, error) in &outcome.rejected {
            self.inner.metrics.record_rejected();
            tracing::warn!("Bulk remove skipped {}: {}", resource.book_path(), error);
        }
        self.update_short_path_names();
        outcome
    }

    fn finish_removal(&self, resource: &Resource) {
        self.inner.metrics.record_file_removed();
        tracing::debug!("Removed {}", resource.book_path());
        self.inner.broadcast(RegistryChange::ResourceRemoved {
            id: resource.id().clone(),
            book_path: resource.book_path(),
        });
    }

    // ---------------------------------------------------------------------
    // Renaming and moving
    // ---------------------------------------------------------------------

    /// Move a resource's file to `new_book_path` and re-key the path index.
    ///
    /// Returns the old book path and old full path.
    fn relocate(
        &self,
        resource: &ResourceHandle,
        new_book_path: &str,
    ) -> Result<(String, Utf8PathBuf)> {
        let (old_book_path, old_full_path) = {
            let _reservation = self
                .inner
                .reservation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut index = self.inner.write_index();
            if !index.by_id.contains_key(resource.id()) {
                return Err(KeeperError::ResourceNotFound(resource.book_path()));
            }
            if index.by_path.contains_key(new_book_path) {
                return Err(KeeperError::PathConflict(new_book_path.to_string()));
            }

            let old_book_path = resource.book_path();
            // The container must point at the package before the move commits
            let is_package = index.is_package(resource);
            if is_package {
                write_container_xml(&self.inner.main_folder, new_book_path)?;
            }

            let old_full_path = match resource.relocate(new_book_path) {
                Ok(old_full_path) => old_full_path,
                Err(e) => {
                    if is_package {
                        if let Err(restore) =
                            write_container_xml(&self.inner.main_folder, &old_book_path)
                        {
                            tracing::warn!("Failed to restore container.xml: {}", restore);
                        }
                    }
                    return Err(if e.kind() == io::ErrorKind::AlreadyExists {
                        KeeperError::PathConflict(new_book_path.to_string())
                    } else {
                        KeeperError::Io(e)
                    });
                }
            };

            index.by_path.remove(&old_book_path);
            index
                .by_path
                .insert(new_book_path.to_string(), Arc::clone(resource));
            (old_book_path, old_full_path)
        };

        if self.inner.watcher.is_tracking(&old_full_path) {
            self.inner.watcher.unwatch(&old_full_path);
            if let Err(e) = self.inner.watcher.watch(&resource.full_path()) {
                tracing::warn!("Failed to re-watch {}: {}", resource.full_path(), e);
            }
        }

        tracing::debug!("Relocated {} -> {}", old_book_path, new_book_path);
        Ok((old_book_path, old_full_path))
    }

    fn is_package_document(&self, resource: &Resource) -> bool {
        self.inner.read_index().is_package(resource)
    }

    /// Rename a resource within its folder.
    ///
    /// # Errors
    /// * `ResourceNotFound` - the resource is not registered
    /// * `PathConflict` - the new name is already taken in that folder
    pub fn rename_resource(&self, resource: &ResourceHandle, new_name: &str) -> Result<()> {
        let new_book_path = join_book_path(starting_dir(&resource.book_path()), new_name);
        let (old_book_path, old_full_path) = self.relocate(resource, &new_book_path)?;

        self.inner.metrics.record_file_renamed();
        self.inner.broadcast(RegistryChange::ResourceRenamed {
            id: resource.id().clone(),
            old_book_path,
            new_book_path,
        });
        if !self.is_package_document(resource) {
            if let Some(observer) = self.inner.observer() {
                observer.resource_renamed(resource, &old_full_path);
            }
        }
        self.update_short_path_names();
        Ok(())
    }

    /// Rename many resources, notifying the package observer once.
    ///
    /// `new_names` pairs up with `resources` by position.
    pub fn bulk_rename_resources<S: AsRef<str>>(
        &self,
        resources: &[ResourceHandle],
        new_names: &[S],
    ) -> BulkOutcome {
        self.bulk_relocate(resources, new_names, |resource, name| {
            join_book_path(starting_dir(&resource.book_path()), name)
        }, BulkKind::Rename)
    }

    /// Move a resource to a new book path, possibly in another folder.
    pub fn move_resource(&self, resource: &ResourceHandle, new_book_path: &str) -> Result<()> {
        let (old_book_path, old_full_path) = self.relocate(resource, new_book_path)?;

        self.inner.metrics.record_file_moved();
        self.inner.broadcast(RegistryChange::ResourceMoved {
            id: resource.id().clone(),
            old_book_path,
            new_book_path: new_book_path.to_string(),
        });
        if !self.is_package_document(resource) {
            if let Some(observer) = self.inner.observer() {
                observer.resource_moved(resource, &old_full_path);
            }
        }
        self.update_short_path_names();
        Ok(())
    }

    /// Move many resources, notifying the package observer once.
    pub fn bulk_move_resources<S: AsRef<str>>(
        &self,
        resources: &[ResourceHandle],
        new_book_paths: &[S],
    ) -> BulkOutcome {
        self.bulk_relocate(resources, new_book_paths, |_, path| path.to_string(), BulkKind::Move)
    }

    fn bulk_relocate<S, F>(
        &self,
        resources: &[ResourceHandle],
        targets: &[S],
        book_path_for: F,
        kind: BulkKind,
    ) -> BulkOutcome
    where
        S: AsRef<str>,
        F: Fn(&Resource, &str) -> String,
    {
        if resources.len() != targets.len() {
            tracing::warn!(
                "Bulk {:?} got {} resources but {} targets; extras ignored",
                kind,
                resources.len(),
                targets.len()
            );
        }

        let mut outcome = BulkOutcome::default();
        let mut relocated: HashMap<String, ResourceHandle> = HashMap::new();

        for (resource, target) in resources.iter().zip(targets) {
            let new_book_path = book_path_for(resource, target.as_ref());
            match self.relocate(resource, &new_book_path) {
                Ok((old_book_path, _)) => {
                    let change = match kind {
                        BulkKind::Rename => {
                            self.inner.metrics.record_file_renamed();
                            RegistryChange::ResourceRenamed {
                                id: resource.id().clone(),
                                old_book_path: old_book_path.clone(),
                                new_book_path,
                            }
                        }
                        BulkKind::Move => {
                            self.inner.metrics.record_file_moved();
                            RegistryChange::ResourceMoved {
                                id: resource.id().clone(),
                                old_book_path: old_book_path.clone(),
                                new_book_path,
                            }
                        }
                    };
                    self.inner.broadcast(change);
                    if !self.is_package_document(resource) {
                        relocated.insert(old_book_path, Arc::clone(resource));
                    }
                    outcome.completed.push(Arc::clone(resource));
                }
                Err(e) => {
                    self.inner.metrics.record_rejected();
                    tracing::warn!(
                        "Bulk {:?} rejected {} -> {}: {}",
                        kind,
                        resource.book_path(),
                        new_book_path,
                        e
                    );
                    outcome.rejected.push((Arc::clone(resource), e));
                }
            }
        }

        if !relocated.is_empty() {
            if let Some(observer) = self.inner.observer() {
                match kind {
                    BulkKind::Rename => observer.resources_renamed(&relocated),
                    BulkKind::Move => observer.resources_moved(&relocated),
                }
            }
        }
        self.update_short_path_names();
        outcome
    }

    // ---------------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------------

    pub fn resource_by_id(&self, id: &ResourceId) -> Option<ResourceHandle> {
        self.inner.read_index().by_id.get(id).cloned()
    }

    /// # Errors
    /// `ResourceNotFound` when nothing lives at `book_path`.
    pub fn resource_by_book_path(&self, book_path: &str) -> Result<ResourceHandle> {
        self.resource_by_book_path_opt(book_path)
            .ok_or_else(|| KeeperError::ResourceNotFound(book_path.to_string()))
    }

    pub fn resource_by_book_path_opt(&self, book_path: &str) -> Option<ResourceHandle> {
        self.inner.read_index().by_path.get(book_path).cloned()
    }

    /// First book path ending in `path_end` whose filename equals the last
    /// segment of `path_end`, both compared case-insensitively.
    ///
    /// Not guaranteed unique; used to resolve links written against
    /// case-insensitive filesystems.
    pub fn book_path_by_path_end(&self, path_end: &str) -> Option<String> {
        let wanted_end = path_end.to_lowercase();
        let wanted_name = filename_of(path_end).to_lowercase();
        self.inner
            .read_index()
            .by_id
            .values()
            .map(|r| r.book_path())
            .find(|book_path| {
                let lowered = book_path.to_lowercase();
                lowered.ends_with(&wanted_end) && filename_of(&lowered) == wanted_name
            })
    }

    /// All resources in registration order.
    pub fn resources(&self) -> Vec<ResourceHandle> {
        self.inner.read_index().by_id.values().cloned().collect()
    }

    pub fn resource_count(&self) -> usize {
        self.inner.read_index().by_id.len()
    }

    pub fn resources_of_type(&self, resource_type: ResourceType) -> Vec<ResourceHandle> {
        self.inner
            .read_index()
            .by_id
            .values()
            .filter(|r| r.resource_type() == resource_type)
            .cloned()
            .collect()
    }

    pub fn resources_of_media_types<S: AsRef<str>>(&self, media_types: &[S]) -> Vec<ResourceHandle> {
        self.inner
            .read_index()
            .by_id
            .values()
            .filter(|r| {
                let media_type = r.media_type();
                media_types.iter().any(|mt| mt.as_ref() == media_type)
            })
            .cloned()
            .collect()
    }

    /// Resources registered at the given book paths; unknown paths are skipped.
    pub fn linked_resources<S: AsRef<str>>(&self, book_paths: &[S]) -> Vec<ResourceHandle> {
        let index = self.inner.read_index();
        book_paths
            .iter()
            .filter_map(|path| index.by_path.get(path.as_ref()).cloned())
            .collect()
    }

    pub fn all_filenames(&self) -> Vec<String> {
        self.inner
            .read_index()
            .by_id
            .values()
            .map(|r| r.filename())
            .collect()
    }

    pub fn all_book_paths(&self) -> Vec<String> {
        self.inner
            .read_index()
            .by_id
            .values()
            .map(|r| r.book_path())
            .collect()
    }

    /// Zero-based reading order of the last HTML section, `-1` with none.
    pub fn highest_reading_order(&self) -> isize {
        let html = self.resources_of_type(ResourceType::Html).len();
        html as isize - 1
    }

    pub fn package_document(&self) -> Option<ResourceHandle> {
        self.inner.read_index().package.clone()
    }

    pub fn navigation_document(&self) -> Option<ResourceHandle> {
        self.inner.read_index().navigation.clone()
    }

    /// Icon cached for a media type when its first file was registered.
    pub fn file_icon_for_media_type(&self, media_type: &str) -> FileIcon {
        self.inner
            .icon_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(media_type)
            .cloned()
            .unwrap_or(FileIcon::GENERIC)
    }

    // ---------------------------------------------------------------------
    // Folder placement
    // ---------------------------------------------------------------------

    fn placed_paths_and_types(&self) -> (Vec<String>, Vec<String>) {
        self.inner
            .read_index()
            .by_id
            .values()
            .map(|r| (r.book_path(), r.media_type()))
            .filter(|(book_path, _)| !book_path.starts_with(METADATA_DIR))
            .unzip()
    }

    /// Recompute the group-to-folder map from where files actually live,
    /// back-filling groups that have no files.
    pub fn refresh_group_folders(&self) {
        let (book_paths, media_types) = self.placed_paths_and_types();
        self.set_group_folders(&book_paths, &media_types, false);
    }

    /// Like [`refresh_group_folders`](Self::refresh_group_folders) but keeps
    /// the folders already known for each group instead of back-filling.
    pub fn update_group_folders(&self) {
        let (book_paths, media_types) = self.placed_paths_and_types();
        self.set_group_folders(&book_paths, &media_types, true);
    }

    pub fn set_group_folders<S: AsRef<str>>(
        &self,
        book_paths: &[S],
        media_types: &[S],
        update_only: bool,
    ) {
        self.inner
            .folders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_group_folders(&self.inner.media_types, book_paths, media_types, update_only);
    }

    pub fn folders_for_group(&self, group: Group) -> Vec<String> {
        self.inner
            .folders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .folders_for_group(group)
    }

    pub fn default_folder_for_group(&self, group: Group) -> String {
        self.inner
            .folders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default_folder_for_group(group)
    }

    pub fn set_folders_for_group(&self, group: Group, folders: Vec<String>) {
        self.inner
            .folders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_folders_for_group(group, folders);
    }

    /// Folder of `group` in the canonical `OEBPS/<Group>` layout.
    pub fn std_folder_for_group(group: Group) -> String {
        GroupFolders::std_folder_for_group(group)
    }

    /// Whether the package and navigation documents and every content
    /// group's folder match the canonical layout exactly, so the tree can be
    /// restructured without loss.
    pub fn is_in_canonical_layout(&self) -> bool {
        let (package, navigation) = {
            let index = self.inner.read_index();
            (index.package.clone(), index.navigation.clone())
        };
        let Some(package) = package else {
            return false;
        };
        if package.book_path() != STD_PACKAGE_PATH {
            return false;
        }
        if navigation.is_some_and(|n| n.book_path() != STD_NAVIGATION_PATH) {
            return false;
        }
        self.inner
            .folders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_standard_layout()
    }

    // ---------------------------------------------------------------------
    // Short names and loading
    // ---------------------------------------------------------------------

    /// Recompute every resource's short name.
    ///
    /// Runs after each add, rename or move; bulk importers that add with
    /// [`AddFileOptions::silent`] call it once at the end.
    pub fn update_short_path_names(&self) {
        let _refresh = self
            .inner
            .short_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let resources = self.resources();
        let book_paths: Vec<String> = resources.iter().map(|r| r.book_path()).collect();
        let short_names = compute_short_names(&book_paths);

        let mut changed = 0;
        for (resource, book_path) in resources.iter().zip(&book_paths) {
            if let Some(short_name) = short_names.get(book_path) {
                if resource.set_short_name(short_name) {
                    changed += 1;
                }
            }
        }

        self.inner.metrics.record_short_name_refresh();
        if changed > 0 {
            tracing::debug!("Short names updated: {} changed", changed);
            self.inner
                .broadcast(RegistryChange::ShortNamesUpdated { changed });
        }
    }

    /// Load the text of every text-bearing resource except HTML, which is
    /// loaded on import when its markup is checked.
    ///
    /// # Returns
    /// The number of resources whose text was loaded
    pub fn perform_initial_loads(&self) -> usize {
        let mut loaded = 0;
        for resource in self.resources() {
            if resource.resource_type() == ResourceType::Html {
                continue;
            }
            match resource.text() {
                Ok(Some(_)) => loaded += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!("Initial load of {} failed: {}", resource.book_path(), e),
            }
        }
        tracing::debug!("Initial loads complete: {} resources", loaded);
        loaded
    }

    // ---------------------------------------------------------------------
    // External-change watching
    // ---------------------------------------------------------------------

    /// Start watching a resource's file for edits made by other programs.
    ///
    /// Only types an external editor may open are watched; others are
    /// silently skipped. Idempotent.
    pub fn watch_resource_file(&self, resource: &ResourceHandle) -> Result<()> {
        if !resource.resource_type().may_open_externally() {
            return Ok(());
        }
        self.inner.watcher.watch(&resource.full_path())
    }

    pub fn is_watching(&self, resource: &Resource) -> bool {
        self.inner.watcher.is_watching(&resource.full_path())
    }

    /// Stop all watches around a batch of programmatic rewrites.
    pub fn suspend_watching(&self) {
        self.inner.watcher.suspend();
    }

    pub fn resume_watching(&self) {
        self.inner.watcher.resume();
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("main_folder", &self.inner.main_folder)
            .field("resources", &self.resource_count())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum BulkKind {
    Rename,
    Move,
}

/// Copy `source` to `destination` unless they are the same file, then
/// normalize permissions to owner read-write, others read-only.
fn copy_into_place(source: &Utf8Path, destination: &Utf8Path) -> io::Result<()> {
    if source == destination {
        return Ok(());
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, destination)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(destination, fs::Permissions::from_mode(0o644))?;
    }

    Ok(())
}

/// Create `path` with `contents` unless a file already exists there.
fn ensure_file(path: &Utf8Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        fs::write(path, contents)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> ResourceRegistry {
        ResourceRegistry::new(Arc::new(MediaTypeTable::default()), KeeperSettings::default())
            .unwrap()
    }

    fn source_file(temp: &TempDir, name: &str, contents: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::try_from(temp.path().join(name)).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_main_folder_has_no_trailing_separator() {
        let registry = registry();
        assert!(!registry.main_folder().as_str().ends_with('/'));
        assert!(registry.main_folder().is_dir());
    }

    #[test]
    fn test_temp_folder_deleted_on_drop() {
        let registry = registry();
        let folder = registry.main_folder().to_path_buf();
        let clone = registry.clone();

        drop(registry);
        assert!(folder.exists());
        drop(clone);
        assert!(!folder.exists());
    }

    #[test]
    fn test_add_file_strips_leading_dot() {
        let temp = TempDir::new().unwrap();
        let source = source_file(&temp, ".hidden.css", "p {}");
        let registry = registry();

        let resource = registry.add_file(&source, AddFileOptions::default()).unwrap();
        assert_eq!(resource.book_path(), "OEBPS/Styles/hidden.css");
        assert_eq!(resource.resource_type(), ResourceType::Css);
    }

    #[test]
    fn test_add_file_makes_name_unique_across_folders() {
        let temp = TempDir::new().unwrap();
        let first = source_file(&temp, "Section0001.xhtml", "<html/>");
        let registry = registry();

        registry.add_file(&first, AddFileOptions::default()).unwrap();
        let second = registry
            .add_file(
                &first,
                AddFileOptions {
                    folder: Some("Other".to_string()),
                    ..AddFileOptions::default()
                },
            )
            .unwrap();

        assert_eq!(second.book_path(), "Other/Section0002.xhtml");
    }

    #[test]
    fn test_explicit_book_path_conflict_rejected() {
        let temp = TempDir::new().unwrap();
        let source = source_file(&temp, "a.css", "");
        let registry = registry();
        let options = AddFileOptions {
            book_path: Some("css/a.css".to_string()),
            ..AddFileOptions::default()
        };

        registry.add_file(&source, options.clone()).unwrap();
        let result = registry.add_file(&source, options);
        assert!(matches!(result, Err(KeeperError::PathConflict(p)) if p == "css/a.css"));
        assert_eq!(registry.resource_count(), 1);
    }

    #[test]
    fn test_metadata_file_keeps_location() {
        let registry = registry();
        let meta = registry.main_folder().join("META-INF");
        fs::create_dir_all(&meta).unwrap();
        fs::write(meta.join("com.apple.ibooks.display-options.xml"), "<x/>").unwrap();

        let resource = registry
            .add_file(meta.join("com.apple.ibooks.display-options.xml"), AddFileOptions::default())
            .unwrap();

        assert_eq!(resource.book_path(), "META-INF/com.apple.ibooks.display-options.xml");
        assert_eq!(resource.resource_type(), ResourceType::Generic);
        assert_eq!(resource.group(), Group::Other);
    }

    #[test]
    fn test_icon_cache_populated() {
        let temp = TempDir::new().unwrap();
        let source = source_file(&temp, "cover.png", "png");
        let registry = registry();

        assert_eq!(registry.file_icon_for_media_type("image/png"), FileIcon::GENERIC);
        registry.add_file(&source, AddFileOptions::default()).unwrap();
        assert_eq!(registry.file_icon_for_media_type("image/png").name, "image-x-generic");
    }

    #[test]
    fn test_book_path_by_path_end() {
        let temp = TempDir::new().unwrap();
        let source = source_file(&temp, "Chapter.xhtml", "");
        let registry = registry();
        registry.add_file(&source, AddFileOptions::default()).unwrap();

        assert_eq!(
            registry.book_path_by_path_end("text/chapter.XHTML").as_deref(),
            Some("OEBPS/Text/Chapter.xhtml")
        );
        assert_eq!(registry.book_path_by_path_end("pter.xhtml"), None);
        assert_eq!(registry.book_path_by_path_end("missing.xhtml"), None);
    }

    #[test]
    fn test_highest_reading_order() {
        let temp = TempDir::new().unwrap();
        let registry = registry();
        assert_eq!(registry.highest_reading_order(), -1);

        let source = source_file(&temp, "s.xhtml", "");
        registry.add_file(&source, AddFileOptions::default()).unwrap();
        registry.add_file(&source, AddFileOptions::default()).unwrap();
        assert_eq!(registry.highest_reading_order(), 1);
    }

    #[test]
    fn test_remove_unregistered_resource_fails() {
        let temp = TempDir::new().unwrap();
        let source = source_file(&temp, "a.css", "");
        let registry = registry();
        let resource = registry.add_file(&source, AddFileOptions::default()).unwrap();

        registry.remove_resource(&resource).unwrap();
        assert!(resource.is_removed());
        assert!(matches!(
            registry.remove_resource(&resource),
            Err(KeeperError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_perform_initial_loads_skips_html() {
        let temp = TempDir::new().unwrap();
        let registry = registry();
        let css = registry
            .add_file(source_file(&temp, "a.css", "p {}"), AddFileOptions::default())
            .unwrap();
        let html = registry
            .add_file(source_file(&temp, "a.xhtml", "<html/>"), AddFileOptions::default())
            .unwrap();
        registry
            .add_file(source_file(&temp, "a.png", "png"), AddFileOptions::default())
            .unwrap();

        assert_eq!(registry.perform_initial_loads(), 1);
        assert!(css.is_text_loaded());
        assert!(!html.is_text_loaded());
    }

    #[test]
    fn test_navigation_skipped_for_epub3() {
        let registry = registry();
        assert!(registry.add_navigation_document("3.0", None, None).unwrap().is_none());

        let settings = KeeperSettings {
            ncx_for_epub3: true,
            ..KeeperSettings::default()
        };
        let registry =
            ResourceRegistry::new(Arc::new(MediaTypeTable::default()), settings).unwrap();
        let ncx = registry.add_navigation_document("3.0", None, None).unwrap();
        assert!(ncx.is_some());
    }
}
