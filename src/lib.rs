// bookfolder - Resource registry for the working folder of an unpacked EPUB
//
// This is the library crate: the registry, the services it is built from,
// and the configuration and logging setup an editor embeds it with.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use error::{KeeperError, Result};
pub use metrics::Metrics;
pub use models::{
    FileIcon, Group, KeeperSettings, MediaTypeTable, Resource, ResourceHandle, ResourceId,
    ResourceKind, ResourceType,
};
pub use registry::{AddFileOptions, BulkOutcome, PackageObserver, RegistryChange, ResourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
