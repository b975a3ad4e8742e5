//! Integration tests for ConfigManager and configuration file handling
//!
//! These tests verify:
//! - Loading and saving of settings and media-type tables
//! - Defaults when files are missing
//! - Hand-edited YAML in the documented key format
//! - Feeding loaded configuration into a ResourceRegistry

use bookfolder::{
    AddFileOptions, ConfigManager, Group, KeeperSettings, MediaTypeTable, ResourceRegistry,
    ResourceType,
};
use camino::Utf8PathBuf;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_config_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, config_path)
}

#[test]
fn test_create_config_manager() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    assert_eq!(manager.config_dir(), &config_path);
    assert_eq!(manager.settings_path(), config_path.join("bookfolder.yaml"));
}

#[test]
fn test_config_dir_created() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let nested = config_path.join("a/b/config");

    ConfigManager::new(&nested).unwrap();
    assert!(nested.is_dir());
}

#[test]
fn test_hand_written_settings() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    fs::write(
        manager.settings_path(),
        "Reappear Timeout Ms: 500\nReappear Poll Ms: 20\nNCX For EPUB3: true\n",
    )
    .unwrap();

    let settings = manager.load_settings().unwrap();
    assert_eq!(settings.reappear_timeout_ms, 500);
    assert_eq!(settings.reappear_poll_ms, 20);
    assert!(settings.ncx_for_epub3);
    assert_eq!(settings.broadcast_capacity, KeeperSettings::default().broadcast_capacity);
}

#[test]
fn test_saved_media_types_are_readable_yaml() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    manager.save_media_types(&MediaTypeTable::default()).unwrap();
    let yaml = fs::read_to_string(manager.media_types_path()).unwrap();

    assert!(yaml.contains("Extensions:"));
    assert!(yaml.contains("css: text/css"));
    assert!(yaml.contains("application/oebps-package+xml: opf"));
}

#[test]
fn test_loaded_table_drives_registry_classification() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let mut table = MediaTypeTable::default();
    table.register(&["md"], "text/markdown", Group::Misc, ResourceType::Text);
    manager.save_media_types(&table).unwrap();

    let registry = ResourceRegistry::new(
        Arc::new(manager.load_media_types().unwrap()),
        manager.load_settings().unwrap(),
    )
    .unwrap();

    let source_dir = TempDir::new().unwrap();
    let source = Utf8PathBuf::try_from(source_dir.path().join("notes.md")).unwrap();
    fs::write(&source, "# Notes").unwrap();

    let resource = registry.add_file(&source, AddFileOptions::default()).unwrap();
    assert_eq!(resource.media_type(), "text/markdown");
    assert_eq!(resource.group(), Group::Misc);
    assert_eq!(resource.book_path(), "OEBPS/Misc/notes.md");
    assert_eq!(resource.text().unwrap().as_deref(), Some("# Notes"));
}
