use crate::models::{KeeperSettings, MediaTypeTable};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;

/// Configuration manager for loading and saving YAML configuration files.
///
/// Manages two configuration files:
/// - Media types (`media-types.yaml`): extension, group and resource-type tables
/// - Settings (`bookfolder.yaml`): watcher timing and navigation-document policy
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    media_types_path: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files; created if missing
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            media_types_path: config_dir.join("media-types.yaml"),
            settings_path: config_dir.join("bookfolder.yaml"),
            config_dir,
        })
    }

    /// Load the media-type tables.
    ///
    /// # Returns
    /// The loaded table, or the built-in table if the file doesn't exist
    pub fn load_media_types(&self) -> Result<MediaTypeTable> {
        self.load_or_default(&self.media_types_path, "media types")
    }

    pub fn save_media_types(&self, table: &MediaTypeTable) -> Result<()> {
        self.save(&self.media_types_path, table, "media types")
    }

    /// Load the registry settings.
    ///
    /// # Returns
    /// The loaded settings, or defaults if the file doesn't exist. Keys
    /// missing from the file take their default values.
    pub fn load_settings(&self) -> Result<KeeperSettings> {
        self.load_or_default(&self.settings_path, "settings")
    }

    pub fn save_settings(&self, settings: &KeeperSettings) -> Result<()> {
        self.save(&self.settings_path, settings, "settings")
    }

    fn load_or_default<T>(&self, path: &Utf8Path, what: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if !path.exists() {
            tracing::warn!("{} file not found at {}, using defaults", what, path);
            return Ok(T::default());
        }

        let file_contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}: {}", what, path))?;

        let value: T = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse {}: {}", what, path))?;

        tracing::info!("Loaded {} from {}", what, path);
        Ok(value)
    }

    fn save<T: Serialize>(&self, path: &Utf8Path, value: &T, what: &str) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(value)
            .with_context(|| format!("Failed to serialize {} to YAML", what))?;

        fs::write(path, yaml_string).with_context(|| format!("Failed to write {}: {}", what, path))?;

        tracing::info!("Saved {} to {}", what, path);
        Ok(())
    }

    pub fn media_types_path(&self) -> &Utf8Path {
        &self.media_types_path
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}
