//! Media classification: which group a file belongs to and which media type
//! it is registered under.

use crate::models::{Group, MediaTypeTable};

/// Reserved metadata directory. Files inside are passed through untouched,
/// except `container.xml` and `encryption.xml` which are regenerated.
pub const METADATA_DIR: &str = "META-INF";

pub fn is_metadata_path(path: &str) -> bool {
    path.contains(METADATA_DIR)
}

/// Lower-cased text after the last `.` of the final path segment.
pub fn extension_of(path: &str) -> String {
    let filename = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match filename.rfind('.') {
        Some(pos) => filename[pos + 1..].to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Maps a file to its semantic group.
///
/// An empty `media_type` means "derive it from the extension". A media type
/// the table does not know is retried through the extension before falling
/// back to [`Group::Misc`].
pub fn classify_group(table: &MediaTypeTable, file_path: &str, media_type: &str) -> Group {
    if is_metadata_path(file_path) {
        return Group::Other;
    }

    let extension = extension_of(file_path);
    let media_type = if media_type.is_empty() {
        match table.media_type_for_extension(&extension) {
            Some(mt) => mt,
            None => return Group::Misc,
        }
    } else {
        media_type
    };

    table
        .group_for_media_type(media_type)
        .or_else(|| {
            table
                .media_type_for_extension(&extension)
                .and_then(|mt| table.group_for_media_type(mt))
        })
        .unwrap_or(Group::Misc)
}

/// Media type a newly added file is registered under.
///
/// A declared type without a known group is logged and ignored. When the
/// extension is unknown too, the declared type is kept as-is.
pub fn resolve_media_type(table: &MediaTypeTable, file_path: &str, declared: Option<&str>) -> String {
    let declared = declared.unwrap_or_default();
    if !declared.is_empty() && table.group_for_media_type(declared).is_some() {
        return declared.to_string();
    }
    if !declared.is_empty() {
        tracing::warn!("Unrecognized media type {:?} for {}", declared, file_path);
    }

    table
        .media_type_for_extension(&extension_of(file_path))
        .unwrap_or(declared)
        .to_string()
}
