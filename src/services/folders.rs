//! Folder placement: which folder each group's files go to.
//!
//! Folder paths are book paths and never end with `/`; the empty string is
//! the working-folder root.

use crate::models::{Group, MediaTypeTable};
use crate::services::classifier::METADATA_DIR;
use indexmap::IndexMap;

/// Book path of the package document in the canonical layout.
pub const STD_PACKAGE_PATH: &str = "OEBPS/content.opf";

/// Book path of the navigation document in the canonical layout.
pub const STD_NAVIGATION_PATH: &str = "OEBPS/toc.ncx";

/// Folder of a file's book path, `""` for files at the root.
pub fn starting_dir(book_path: &str) -> &str {
    match book_path.rfind('/') {
        Some(pos) => &book_path[..pos],
        None => "",
    }
}

/// Joins a folder and a filename into a book path.
pub fn join_book_path(folder: &str, filename: &str) -> String {
    if folder.is_empty() {
        filename.to_string()
    } else {
        format!("{folder}/{filename}")
    }
}

/// Longest run of leading segments shared by all folders, with a trailing
/// `/`, or `""` when they share nothing. A single folder yields its parent.
pub fn longest_common_path<S: AsRef<str>>(folders: &[S]) -> String {
    match folders {
        [] => String::new(),
        [only] => {
            let parent = starting_dir(only.as_ref());
            if parent.is_empty() {
                String::new()
            } else {
                format!("{parent}/")
            }
        }
        [first, rest @ ..] => {
            let mut common: Vec<&str> = first.as_ref().split('/').collect();
            for folder in rest {
                let shared = common
                    .iter()
                    .zip(folder.as_ref().split('/'))
                    .take_while(|(a, b)| **a == *b)
                    .count();
                common.truncate(shared);
            }
            let common: Vec<&str> = common.into_iter().filter(|s| !s.is_empty()).collect();
            if common.is_empty() {
                String::new()
            } else {
                format!("{}/", common.join("/"))
            }
        }
    }
}

/// Orders folders by descending file count; ties keep first-seen order.
pub fn sort_by_counts(folders: Vec<(String, usize)>) -> Vec<String> {
    let mut folders = folders;
    folders.sort_by(|a, b| b.1.cmp(&a.1));
    folders.into_iter().map(|(folder, _)| folder).collect()
}

/// Relative href from one file's book path to another's.
pub fn build_relative_path(from_file: &str, to_file: &str) -> String {
    let from_dirs: Vec<&str> = starting_dir(from_file)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let to_segments: Vec<&str> = to_file.split('/').collect();
    let (to_dirs, to_name) = to_segments.split_at(to_segments.len() - 1);

    let shared = from_dirs
        .iter()
        .zip(to_dirs)
        .take_while(|(a, b)| *a == *b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from_dirs.len() - shared];
    parts.extend(&to_dirs[shared..]);
    parts.extend(to_name);
    parts.join("/")
}

/// Mapping from group to its ordered candidate folders; the first is the
/// default destination for new files of that group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupFolders {
    folders: IndexMap<Group, Vec<String>>,
}

impl GroupFolders {
    /// The canonical `OEBPS/<Group>` layout.
    pub fn standard() -> Self {
        let mut folders = IndexMap::new();
        for group in Group::CONTENT {
            folders.insert(group, vec![format!("OEBPS/{group}")]);
        }
        folders.insert(Group::Ncx, vec!["OEBPS".to_string()]);
        folders.insert(Group::Opf, vec!["OEBPS".to_string()]);
        folders.insert(Group::Other, vec![String::new()]);
        Self { folders }
    }

    /// Folder of `group` in the canonical layout.
    pub fn std_folder_for_group(group: Group) -> String {
        Self::standard().default_folder_for_group(group)
    }

    /// Candidate folders of `group`; the root when the group has none.
    pub fn folders_for_group(&self, group: Group) -> Vec<String> {
        match self.folders.get(&group) {
            Some(folders) if !folders.is_empty() => folders.clone(),
            _ => vec![String::new()],
        }
    }

    pub fn default_folder_for_group(&self, group: Group) -> String {
        self.folders
            .get(&group)
            .and_then(|folders| folders.first())
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_folders_for_group(&mut self, group: Group, folders: Vec<String>) {
        self.folders.insert(group, folders);
    }

    /// Rebuilds the map from where files of each group actually live.
    ///
    /// Each group's folders are ordered by how many of its files they hold.
    /// With `update_only`, folders the map already knew are kept after the
    /// observed ones, so empty folders are not dropped. Otherwise placed
    /// groups with no files are back-filled under the base path the observed
    /// folders share, lower-cased when existing folders use lower-case names.
    pub fn set_group_folders<S: AsRef<str>>(
        &mut self,
        table: &MediaTypeTable,
        book_paths: &[S],
        media_types: &[S],
        update_only: bool,
    ) {
        let mut observed: IndexMap<Group, Vec<(String, usize)>> = IndexMap::new();

        for (book_path, media_type) in book_paths.iter().zip(media_types) {
            let book_path = book_path.as_ref();
            if book_path.starts_with(METADATA_DIR) {
                continue;
            }
            let group = table
                .group_for_media_type(media_type.as_ref())
                .unwrap_or(Group::Other);
            let folder = starting_dir(book_path);
            let counts = observed.entry(group).or_default();
            match counts.iter_mut().find(|(f, _)| f == folder) {
                Some((_, count)) => *count += 1,
                None => counts.push((folder.to_string(), 1)),
            }
        }

        let mut group_folders: IndexMap<Group, Vec<String>> = IndexMap::new();
        let mut defaults = Vec::new();
        let mut use_lower_case = false;
        for (group, counts) in observed {
            let sorted = sort_by_counts(counts);
            let default = sorted[0].clone();
            if Group::CONTENT.contains(&group) && default.contains(&group.as_str().to_lowercase()) {
                use_lower_case = true;
            }
            defaults.push(default);
            group_folders.insert(group, sorted);
        }

        if update_only {
            for group in Group::PLACED {
                let current = self.folders_for_group(group);
                let folders = group_folders.entry(group).or_default();
                for folder in current {
                    if !folders.contains(&folder) {
                        folders.push(folder);
                    }
                }
            }
        } else {
            let common_base = longest_common_path(&defaults);
            for group in Group::PLACED {
                let folders = group_folders.entry(group).or_default();
                if folders.is_empty() {
                    let name = if use_lower_case {
                        group.as_str().to_lowercase()
                    } else {
                        group.as_str().to_string()
                    };
                    folders.push(format!("{common_base}{name}"));
                }
            }
        }

        tracing::debug!("Group folders recomputed: {:?}", group_folders);
        self.folders = group_folders;
    }

    /// Whether every content group has exactly its canonical folder.
    pub fn is_standard_layout(&self) -> bool {
        Group::CONTENT.iter().all(|group| {
            let folders = self.folders_for_group(*group);
            folders.len() == 1 && folders[0] == Self::std_folder_for_group(*group)
        })
    }
}

impl Default for GroupFolders {
    fn default() -> Self {
        Self::standard()
    }
}
