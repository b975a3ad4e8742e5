//! Data models for the resource registry.
//!
//! - [`Resource`]: one file of the package, with its identity, book path, short name
//!   and per-type payload ([`ResourceKind`])
//! - [`Group`] / [`ResourceType`]: classification outputs
//! - [`MediaTypeTable`]: extension, group and resource-type lookups, loaded from
//!   `media-types.yaml` or built in
//! - [`KeeperSettings`]: watcher timing and navigation-document policy from `bookfolder.yaml`
//!
//! # Architecture Note
//!
//! Tables and settings are plain serializable values. Resources are shared as
//! [`ResourceHandle`]s (`Arc<Resource>`) and keep their mutable fields behind an
//! internal lock, so a handle stays valid across renames and moves.

pub mod media_types;
pub mod resource;
pub mod settings;

pub use media_types::{FileIcon, MediaTypeTable, NAVIGATION_MEDIA_TYPE, PACKAGE_MEDIA_TYPE};
pub use resource::{Group, Resource, ResourceHandle, ResourceId, ResourceKind, ResourceType};
pub use settings::KeeperSettings;
