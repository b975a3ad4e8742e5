//! Services module - Pure logic behind the resource registry.
//!
//! These pieces have no knowledge of the registry's locks or indexes; they
//! take plain inputs and return plain outputs.
//!
//! # Components
//!
//! - [`classifier`]: maps a file path and media type to a [`Group`](crate::models::Group)
//!   and picks the media type a new file is registered under
//! - [`naming`]: collision-free filenames (`Section0001.xhtml` → `Section0002.xhtml`)
//! - [`short_names`]: shortest unique display labels over all book paths
//! - [`folders`]: the group-to-folder map and the canonical `OEBPS/<Group>` layout
//! - [`templates`]: `container.xml` and the boilerplate NCX
//! - [`watcher`]: external-change detection on top of `notify`

pub mod classifier;
pub mod folders;
pub mod naming;
pub mod short_names;
pub mod templates;
pub mod watcher;

pub use classifier::{classify_group, is_metadata_path, resolve_media_type, METADATA_DIR};
pub use folders::GroupFolders;
pub use naming::make_unique;
pub use short_names::compute_short_names;
pub use watcher::{ExternalChangeWatcher, WatchTiming};
