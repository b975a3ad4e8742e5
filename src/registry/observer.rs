use crate::models::{Resource, ResourceHandle};
use camino::Utf8Path;
use std::collections::HashMap;

/// Receives every registry mutation so the package document's manifest and
/// spine stay in step with the working folder.
///
/// The registry calls these after its own bookkeeping is complete and never
/// while holding an index lock, so an implementation may call back into the
/// registry. Bulk operations fire exactly one batched call instead of one
/// per item.
pub trait PackageObserver: Send + Sync {
    fn resource_added(&self, resource: &Resource);

    /// Called before the backing file is deleted.
    fn resource_removed(&self, resource: &Resource);

    /// `old_full_path` is the on-disk path before the rename.
    fn resource_renamed(&self, resource: &Resource, old_full_path: &Utf8Path);

    fn resource_moved(&self, resource: &Resource, old_full_path: &Utf8Path);

    /// Map from old book path to the renamed resource.
    fn resources_renamed(&self, renamed: &HashMap<String, ResourceHandle>);

    /// Map from old book path to the moved resource.
    fn resources_moved(&self, moved: &HashMap<String, ResourceHandle>);

    fn resources_removed(&self, removed: &[ResourceHandle]);

    /// Unique identifier of the package, embedded in a new navigation document.
    fn main_identifier(&self) -> String;
}
