use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised by the resource registry and its watcher.
///
/// Precondition violations (missing source file, missing lookup target,
/// occupied destination) are reported to the immediate caller. Data-quality
/// problems such as an unrecognized media type never become an error; they
/// are logged and recovered by falling back to extension-based detection.
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("File does not exist: {0}")]
    FileNotFound(Utf8PathBuf),

    #[error("No resource at book path: {0}")]
    ResourceNotFound(String),

    #[error("Failed to copy {source_path} to {destination}: {error}")]
    CopyFailed {
        source_path: Utf8PathBuf,
        destination: Utf8PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Book path already in use: {0}")]
    PathConflict(String),

    #[error("Package document already exists at {0}")]
    PackageDocumentExists(String),

    #[error("Navigation document already exists at {0}")]
    NavigationDocumentExists(String),

    #[error("Working folder path is not valid UTF-8: {0}")]
    NonUtf8Path(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KeeperError>;
