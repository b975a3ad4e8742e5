use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Shared handle to a registered resource.
///
/// The registry decides when a resource is registered and removed; callers
/// hold handles only to query it or pass it back into registry operations.
pub type ResourceHandle = Arc<Resource>;

/// Semantic file category used to decide folder placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Group {
    Text,
    Styles,
    Images,
    Fonts,
    Audio,
    Video,
    Misc,
    #[serde(rename = "opf")]
    Opf,
    #[serde(rename = "ncx")]
    Ncx,
    #[serde(rename = "other")]
    Other,
}

impl Group {
    /// Content groups that always get a folder of their own.
    pub const CONTENT: [Group; 7] = [
        Group::Text,
        Group::Styles,
        Group::Images,
        Group::Fonts,
        Group::Audio,
        Group::Video,
        Group::Misc,
    ];

    /// Content groups plus the package and navigation documents.
    pub const PLACED: [Group; 9] = [
        Group::Text,
        Group::Styles,
        Group::Images,
        Group::Fonts,
        Group::Audio,
        Group::Video,
        Group::Misc,
        Group::Opf,
        Group::Ncx,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Group::Text => "Text",
            Group::Styles => "Styles",
            Group::Images => "Images",
            Group::Fonts => "Fonts",
            Group::Audio => "Audio",
            Group::Video => "Video",
            Group::Misc => "Misc",
            Group::Opf => "opf",
            Group::Ncx => "ncx",
            Group::Other => "other",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plain discriminant of [`ResourceKind`], used for type queries and tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Generic,
    Text,
    Audio,
    Video,
    Pdf,
    Image,
    Svg,
    Font,
    Html,
    Css,
    Xml,
    PackageDocument,
    Navigation,
}

impl ResourceType {
    /// Whether an external editor may be launched on files of this type,
    /// which is what makes them worth watching for outside modification.
    pub fn may_open_externally(self) -> bool {
        matches!(
            self,
            ResourceType::Html
                | ResourceType::Css
                | ResourceType::Image
                | ResourceType::Svg
                | ResourceType::Text
                | ResourceType::Xml
                | ResourceType::Audio
                | ResourceType::Video
                | ResourceType::Pdf
        )
    }
}

/// Process-unique resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lazily loaded text content of a text-bearing resource.
///
/// Loading is deferred until first use and the buffer is dropped whenever the
/// file changes on disk, so the next read picks up the external edit.
#[derive(Debug, Default)]
pub struct TextBuffer {
    cached: Mutex<Option<String>>,
}

impl TextBuffer {
    fn read(&self, path: &Utf8Path) -> io::Result<String> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(text) = cached.as_ref() {
            return Ok(text.clone());
        }
        let text = fs::read_to_string(path)?;
        *cached = Some(text.clone());
        Ok(text)
    }

    fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn is_loaded(&self) -> bool {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Per-type payload of a resource.
///
/// Binary kinds carry nothing; text-bearing kinds carry a [`TextBuffer`]; the
/// package and navigation documents also carry their format version.
#[derive(Debug)]
pub enum ResourceKind {
    Generic,
    Text(TextBuffer),
    Audio,
    Video,
    Pdf,
    Image,
    Svg(TextBuffer),
    Font,
    Html(TextBuffer),
    Css(TextBuffer),
    Xml(TextBuffer),
    PackageDocument {
        version: String,
        text: TextBuffer,
    },
    Navigation {
        version: String,
        main_id: RwLock<String>,
        text: TextBuffer,
    },
}

impl ResourceKind {
    /// The single factory for resource payloads, keyed on the media-type
    /// table's resource-type output.
    pub fn for_type(resource_type: ResourceType, version: &str) -> Self {
        match resource_type {
            ResourceType::Generic => ResourceKind::Generic,
            ResourceType::Text => ResourceKind::Text(TextBuffer::default()),
            ResourceType::Audio => ResourceKind::Audio,
            ResourceType::Video => ResourceKind::Video,
            ResourceType::Pdf => ResourceKind::Pdf,
            ResourceType::Image => ResourceKind::Image,
            ResourceType::Svg => ResourceKind::Svg(TextBuffer::default()),
            ResourceType::Font => ResourceKind::Font,
            ResourceType::Html => ResourceKind::Html(TextBuffer::default()),
            ResourceType::Css => ResourceKind::Css(TextBuffer::default()),
            ResourceType::Xml => ResourceKind::Xml(TextBuffer::default()),
            ResourceType::PackageDocument => ResourceKind::PackageDocument {
                version: version.to_string(),
                text: TextBuffer::default(),
            },
            ResourceType::Navigation => ResourceKind::Navigation {
                version: version.to_string(),
                main_id: RwLock::new(String::new()),
                text: TextBuffer::default(),
            },
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceKind::Generic => ResourceType::Generic,
            ResourceKind::Text(_) => ResourceType::Text,
            ResourceKind::Audio => ResourceType::Audio,
            ResourceKind::Video => ResourceType::Video,
            ResourceKind::Pdf => ResourceType::Pdf,
            ResourceKind::Image => ResourceType::Image,
            ResourceKind::Svg(_) => ResourceType::Svg,
            ResourceKind::Font => ResourceType::Font,
            ResourceKind::Html(_) => ResourceType::Html,
            ResourceKind::Css(_) => ResourceType::Css,
            ResourceKind::Xml(_) => ResourceType::Xml,
            ResourceKind::PackageDocument { .. } => ResourceType::PackageDocument,
            ResourceKind::Navigation { .. } => ResourceType::Navigation,
        }
    }

    fn text_buffer(&self) -> Option<&TextBuffer> {
        match self {
            ResourceKind::Text(text)
            | ResourceKind::Svg(text)
            | ResourceKind::Html(text)
            | ResourceKind::Css(text)
            | ResourceKind::Xml(text)
            | ResourceKind::PackageDocument { text, .. }
            | ResourceKind::Navigation { text, .. } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct ResourceState {
    book_path: String,
    short_name: String,
    media_type: String,
    group: Group,
    epub_version: String,
}

/// One file belonging to the package.
///
/// Identity and payload are fixed for the resource's lifetime; the book path
/// and short name change in place on rename or move.
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    main_folder: Utf8PathBuf,
    kind: ResourceKind,
    state: RwLock<ResourceState>,
    removed: AtomicBool,
}

impl Resource {
    pub(crate) fn new(
        main_folder: &Utf8Path,
        book_path: String,
        kind: ResourceKind,
        media_type: String,
        group: Group,
        epub_version: String,
    ) -> Self {
        let short_name = filename_of(&book_path).to_string();
        Self {
            id: ResourceId::new(),
            main_folder: main_folder.to_path_buf(),
            kind,
            state: RwLock::new(ResourceState {
                book_path,
                short_name,
                media_type,
                group,
                epub_version,
            }),
            removed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::RwLockReadGuard<'_, ResourceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn resource_type(&self) -> ResourceType {
        self.kind.resource_type()
    }

    /// Path relative to the working-folder root; the canonical address of the
    /// file within the package.
    pub fn book_path(&self) -> String {
        self.state().book_path.clone()
    }

    pub fn full_path(&self) -> Utf8PathBuf {
        self.main_folder.join(&self.state().book_path)
    }

    pub fn filename(&self) -> String {
        filename_of(&self.state().book_path).to_string()
    }

    pub fn short_name(&self) -> String {
        self.state().short_name.clone()
    }

    pub fn media_type(&self) -> String {
        self.state().media_type.clone()
    }

    pub fn group(&self) -> Group {
        self.state().group
    }

    pub fn epub_version(&self) -> String {
        self.state().epub_version.clone()
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Format version of the package or navigation document.
    pub fn document_version(&self) -> Option<&str> {
        match &self.kind {
            ResourceKind::PackageDocument { version, .. }
            | ResourceKind::Navigation { version, .. } => Some(version),
            _ => None,
        }
    }

    /// Package identifier a navigation document is linked to.
    pub fn main_identifier(&self) -> Option<String> {
        match &self.kind {
            ResourceKind::Navigation { main_id, .. } => {
                Some(main_id.read().unwrap_or_else(PoisonError::into_inner).clone())
            }
            _ => None,
        }
    }

    /// Text content of a text-bearing resource, loaded from disk on first use.
    ///
    /// Returns `Ok(None)` for binary resources.
    pub fn text(&self) -> io::Result<Option<String>> {
        match self.kind.text_buffer() {
            Some(buffer) => buffer.read(&self.full_path()).map(Some),
            None => Ok(None),
        }
    }

    pub fn is_text_loaded(&self) -> bool {
        self.kind.text_buffer().is_some_and(TextBuffer::is_loaded)
    }

    /// Drops cached content so the next [`text`](Self::text) call rereads the
    /// file that an external editor replaced.
    pub fn file_changed_on_disk(&self) {
        if let Some(buffer) = self.kind.text_buffer() {
            buffer.invalidate();
        }
        tracing::debug!("Resource {} changed on disk", self.book_path());
    }

    pub(crate) fn set_short_name(&self, short_name: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.short_name == short_name {
            return false;
        }
        state.short_name = short_name.to_string();
        true
    }

    pub(crate) fn set_main_identifier(&self, value: &str) {
        if let ResourceKind::Navigation { main_id, .. } = &self.kind {
            *main_id.write().unwrap_or_else(PoisonError::into_inner) = value.to_string();
        }
    }

    /// Moves the backing file to `new_book_path` and updates the book path.
    ///
    /// Fails with `AlreadyExists` when the destination file is present.
    /// Returns the previous full path.
    pub(crate) fn relocate(&self, new_book_path: &str) -> io::Result<Utf8PathBuf> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let old_full_path = self.main_folder.join(&state.book_path);
        let new_full_path = self.main_folder.join(new_book_path);

        if new_full_path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("destination exists: {new_full_path}"),
            ));
        }
        if let Some(parent) = new_full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&old_full_path, &new_full_path)?;

        state.book_path = new_book_path.to_string();
        Ok(old_full_path)
    }

    /// Marks the resource removed and deletes its backing file.
    pub(crate) fn delete(&self) -> io::Result<()> {
        self.removed.store(true, Ordering::Release);
        if let Some(buffer) = self.kind.text_buffer() {
            buffer.invalidate();
        }
        match fs::remove_file(self.full_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

/// Final segment of a book path.
pub fn filename_of(book_path: &str) -> &str {
    book_path.rsplit('/').next().unwrap_or(book_path)
}
