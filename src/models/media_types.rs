use crate::models::resource::{Group, ResourceType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";
pub const NAVIGATION_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Media-type lookup tables: extension to media type, media type to group,
/// media type to resource type.
///
/// The table is constructed once per loaded document and handed to the
/// registry; it is never mutated afterwards. Keys are stored lower-case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaTypeTable {
    #[serde(rename = "Extensions")]
    pub extensions: IndexMap<String, String>,

    #[serde(rename = "Groups")]
    pub groups: IndexMap<String, Group>,

    #[serde(rename = "Resource_Types")]
    pub resource_types: IndexMap<String, ResourceType>,
}

impl MediaTypeTable {
    pub fn media_type_for_extension(&self, extension: &str) -> Option<&str> {
        self.extensions
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn group_for_media_type(&self, media_type: &str) -> Option<Group> {
        self.groups.get(&media_type.to_ascii_lowercase()).copied()
    }

    pub fn resource_type_for_media_type(&self, media_type: &str) -> Option<ResourceType> {
        self.resource_types
            .get(&media_type.to_ascii_lowercase())
            .copied()
    }

    /// Adds or replaces one media type across all three tables.
    pub fn register(
        &mut self,
        extensions: &[&str],
        media_type: &str,
        group: Group,
        resource_type: ResourceType,
    ) {
        let media_type = media_type.to_ascii_lowercase();
        for ext in extensions {
            self.extensions
                .insert(ext.to_ascii_lowercase(), media_type.clone());
        }
        self.groups.insert(media_type.clone(), group);
        self.resource_types.insert(media_type, resource_type);
    }
}

impl Default for MediaTypeTable {
    fn default() -> Self {
        use Group as G;
        use ResourceType as R;

        let mut table = Self {
            extensions: IndexMap::new(),
            groups: IndexMap::new(),
            resource_types: IndexMap::new(),
        };

        table.register(&["xhtml", "html", "htm"], "application/xhtml+xml", G::Text, R::Html);
        table.register(&["css"], "text/css", G::Styles, R::Css);

        table.register(&["jpg", "jpeg", "jpe"], "image/jpeg", G::Images, R::Image);
        table.register(&["png"], "image/png", G::Images, R::Image);
        table.register(&["gif"], "image/gif", G::Images, R::Image);
        table.register(&["webp"], "image/webp", G::Images, R::Image);
        table.register(&["bmp"], "image/bmp", G::Images, R::Image);
        table.register(&["tif", "tiff"], "image/tiff", G::Images, R::Image);
        table.register(&["svg"], "image/svg+xml", G::Images, R::Svg);

        table.register(&["ttf"], "font/ttf", G::Fonts, R::Font);
        table.register(&["otf"], "font/otf", G::Fonts, R::Font);
        table.register(&["woff"], "font/woff", G::Fonts, R::Font);
        table.register(&["woff2"], "font/woff2", G::Fonts, R::Font);
        // Legacy font media types still found in older packages
        table.register(&[], "application/x-font-ttf", G::Fonts, R::Font);
        table.register(&[], "application/vnd.ms-opentype", G::Fonts, R::Font);
        table.register(&[], "application/font-woff", G::Fonts, R::Font);

        table.register(&["mp3"], "audio/mpeg", G::Audio, R::Audio);
        table.register(&["m4a", "aac"], "audio/mp4", G::Audio, R::Audio);
        table.register(&["ogg", "oga"], "audio/ogg", G::Audio, R::Audio);
        table.register(&["wav"], "audio/wav", G::Audio, R::Audio);

        table.register(&["mp4", "m4v"], "video/mp4", G::Video, R::Video);
        table.register(&["webm"], "video/webm", G::Video, R::Video);
        table.register(&["ogv"], "video/ogg", G::Video, R::Video);

        table.register(&["pdf"], "application/pdf", G::Misc, R::Pdf);
        table.register(&["js"], "application/javascript", G::Misc, R::Text);
        table.register(&["txt"], "text/plain", G::Misc, R::Text);
        table.register(&["xml"], "application/xml", G::Misc, R::Xml);
        table.register(&["smil"], "application/smil+xml", G::Misc, R::Xml);
        table.register(&["pls"], "application/pls+xml", G::Misc, R::Xml);
        table.register(&["xpgt"], "application/adobe-page-template+xml", G::Misc, R::Xml);

        table.register(&["opf"], PACKAGE_MEDIA_TYPE, G::Opf, R::Xml);
        table.register(&["ncx"], NAVIGATION_MEDIA_TYPE, G::Ncx, R::Xml);

        table
    }
}

/// Display icon for a media type, named after the freedesktop icon theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIcon {
    pub name: &'static str,
}

impl FileIcon {
    pub const GENERIC: FileIcon = FileIcon { name: "text-x-generic" };

    pub fn for_media_type(media_type: &str) -> Self {
        let name = match media_type {
            "application/xhtml+xml" => "text-html",
            "text/css" => "text-css",
            "image/svg+xml" => "image-svg+xml",
            "application/pdf" => "application-pdf",
            "application/oebps-package+xml" | "application/x-dtbncx+xml" => "text-xml",
            mt if mt.starts_with("image/") => "image-x-generic",
            mt if mt.starts_with("audio/") => "audio-x-generic",
            mt if mt.starts_with("video/") => "video-x-generic",
            mt if mt.starts_with("font/") || mt.contains("font") || mt.contains("opentype") => {
                "font-x-generic"
            }
            mt if mt.ends_with("+xml") || mt.ends_with("/xml") => "text-xml",
            _ => return Self::GENERIC,
        };
        FileIcon { name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lookups() {
        let table = MediaTypeTable::default();
        assert_eq!(table.media_type_for_extension("CSS"), Some("text/css"));
        assert_eq!(table.group_for_media_type("text/css"), Some(Group::Styles));
        assert_eq!(
            table.resource_type_for_media_type("image/svg+xml"),
            Some(ResourceType::Svg)
        );
        assert_eq!(table.group_for_media_type("application/x-unknown"), None);
    }

    #[test]
    fn test_register_overrides() {
        let mut table = MediaTypeTable::default();
        table.register(&["md"], "text/markdown", Group::Misc, ResourceType::Text);

        assert_eq!(table.media_type_for_extension("md"), Some("text/markdown"));
        assert_eq!(table.group_for_media_type("TEXT/MARKDOWN"), Some(Group::Misc));
    }

    #[test]
    fn test_icons() {
        assert_eq!(FileIcon::for_media_type("image/png").name, "image-x-generic");
        assert_eq!(FileIcon::for_media_type("font/woff2").name, "font-x-generic");
        assert_eq!(FileIcon::for_media_type("application/x-whatever"), FileIcon::GENERIC);
    }

    #[test]
    fn test_yaml_round_trip_keeps_order() {
        let table = MediaTypeTable::default();
        let yaml = serde_yaml_ng::to_string(&table).unwrap();
        let loaded: MediaTypeTable = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.extensions.keys().next().map(String::as_str), Some("xhtml"));
    }
}
