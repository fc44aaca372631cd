//! Record store collaborators.
//!
//! The router never touches storage directly: it resolves root-key records
//! and folders through [`RecordStore`] and persists minted minion
//! credentials through [`RecordCreator`].

use std::path::PathBuf;

use commandlink_models::{CredentialRecord, FolderRef, NewRecord};

/// Errors raised by a record store.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The backing file could not be read or written.
    #[error("vault I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not a valid vault.
    #[error("vault {path} is corrupt: {source}")]
    Corrupt {
        /// File that failed to parse.
        path: PathBuf,
        /// Parse failure.
        source: serde_json::Error,
    },

    /// A record with the same title already exists in the folder.
    #[error("record \"{title}\" already exists in folder \"{folder}\" (use --force)")]
    Duplicate {
        /// Conflicting title.
        title: String,
        /// Folder name.
        folder: String,
    },

    /// The target folder does not exist.
    #[error("folder {0} not found")]
    UnknownFolder(String),
}

/// Read access to stored credentials.
pub trait RecordStore {
    /// Record at `path`: `/`-separated folder names ending with a record
    /// title (case-insensitive) or a record uid.
    fn resolve_record(&self, path: &str) -> Result<Option<CredentialRecord>, RecordError>;

    /// Folder at `path`, whose every component must be a folder name.
    fn resolve_folder(&self, path: &str) -> Result<Option<FolderRef>, RecordError>;
}

/// Write access for newly issued credentials.
pub trait RecordCreator {
    /// Store `record` in `folder` and return its uid.
    ///
    /// Refuses a duplicate title in the same folder unless `force` is set.
    fn create(&self, folder: &FolderRef, record: NewRecord, force: bool)
        -> Result<String, RecordError>;
}
