//! Fixed-format files the registry generates itself.

use crate::services::classifier::METADATA_DIR;
use camino::Utf8Path;
use std::fs;
use std::io;

pub const CONTAINER_FILENAME: &str = "container.xml";
pub const PACKAGE_FILENAME: &str = "content.opf";
pub const NAVIGATION_FILENAME: &str = "toc.ncx";
pub const FIRST_SECTION_FILENAME: &str = "Section0001.xhtml";

/// Container descriptor pointing a reading system at the package document.
pub fn container_xml(package_book_path: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
    <rootfiles>
        <rootfile full-path="{package_book_path}" media-type="application/oebps-package+xml"/>
   </rootfiles>
</container>
"#
    )
}

/// Writes `META-INF/container.xml` under the working folder.
pub fn write_container_xml(main_folder: &Utf8Path, package_book_path: &str) -> io::Result<()> {
    let dir = main_folder.join(METADATA_DIR);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(CONTAINER_FILENAME), container_xml(package_book_path))
}

/// Boilerplate NCX whose single entry points at the first section.
///
/// `first_section_href` is relative to the NCX file itself.
pub fn default_ncx(first_section_href: &str, main_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN"
   "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{main_id}" />
    <meta name="dtb:depth" content="0" />
    <meta name="dtb:totalPageCount" content="0" />
    <meta name="dtb:maxPageNumber" content="0" />
  </head>
  <docTitle>
    <text>Unknown</text>
  </docTitle>
  <navMap>
    <navPoint id="navPoint-1" playOrder="1">
      <navLabel>
        <text>Start</text>
      </navLabel>
      <content src="{first_section_href}" />
    </navPoint>
  </navMap>
</ncx>
"#
    )
}
