//! JSON-file record vault.
//!
//! ```json
//! {
//!   "folders": [{ "uid": "f1", "name": "Remote" }],
//!   "records": [{ "folder": "f1", "uid": "r1", "title": "Root key", "url": "…", "fields": [] }]
//! }
//! ```
//!
//! Folders nest through an optional `parent` uid; records without a
//! `folder` live at the root. Every change writes the whole vault to a
//! temporary file beside it, which then replaces the old file, so a failed
//! write leaves both the file and the in-memory view as they were. The file
//! is kept owner-readable only.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use commandlink_models::{CredentialRecord, FolderRef, NewRecord};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::records::{RecordCreator, RecordError, RecordStore};

/// Name reported for the root folder.
const ROOT_FOLDER_NAME: &str = "/";

#[derive(Serialize, Deserialize, Debug, Default)]
struct VaultFile {
    #[serde(default)]
    folders: Vec<StoredFolder>,
    #[serde(default)]
    records: Vec<StoredRecord>,
}

#[derive(Serialize, Deserialize, Debug)]
struct StoredFolder {
    uid: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct StoredRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    folder: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    record_type: Option<String>,
    #[serde(flatten)]
    record: CredentialRecord,
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.trim().is_empty()).collect()
}

impl VaultFile {
    /// Walk folder names from the root. `Some(None)` is the root itself.
    fn find_folder(&self, names: &[&str]) -> Option<Option<&StoredFolder>> {
        let mut current: Option<&StoredFolder> = None;
        for name in names {
            let parent = current.map(|f| f.uid.as_str());
            current = Some(
                self.folders
                    .iter()
                    .find(|f| f.parent.as_deref() == parent && same_name(&f.name, name))?,
            );
        }
        Some(current)
    }

    fn folder_ref(folder: Option<&StoredFolder>) -> FolderRef {
        match folder {
            Some(f) => FolderRef {
                uid: f.uid.clone(),
                name: f.name.clone(),
            },
            None => FolderRef {
                uid: String::new(),
                name: ROOT_FOLDER_NAME.to_string(),
            },
        }
    }
}

/// Record vault persisted as one JSON file.
#[derive(Debug)]
pub struct FileVault {
    path: PathBuf,
    data: Mutex<VaultFile>,
}

impl FileVault {
    /// Load the vault at `path`; a missing file is an empty vault.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RecordError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| RecordError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no vault yet, starting empty");
                VaultFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// File backing this vault.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data(&self) -> MutexGuard<'_, VaultFile> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, data: &VaultFile) -> Result<(), RecordError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(data).map_err(std::io::Error::other)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl RecordStore for FileVault {
    fn resolve_record(&self, path: &str) -> Result<Option<CredentialRecord>, RecordError> {
        let data = self.data();
        let parts = components(path);
        let Some((name, folders)) = parts.split_last() else {
            return Ok(None);
        };

        if let Some(stored) = data.records.iter().find(|r| r.record.uid == *name) {
            return Ok(Some(stored.record.clone()));
        }

        let Some(folder) = data.find_folder(folders) else {
            return Ok(None);
        };
        let folder_uid = folder.map(|f| f.uid.as_str());
        Ok(data
            .records
            .iter()
            .find(|r| r.folder.as_deref() == folder_uid && same_name(&r.record.title, name))
            .map(|r| r.record.clone()))
    }

    fn resolve_folder(&self, path: &str) -> Result<Option<FolderRef>, RecordError> {
        let data = self.data();
        Ok(data
            .find_folder(&components(path))
            .map(VaultFile::folder_ref))
    }
}

impl RecordCreator for FileVault {
    fn create(
        &self,
        folder: &FolderRef,
        record: NewRecord,
        force: bool,
    ) -> Result<String, RecordError> {
        let mut data = self.data();

        let folder_uid = if folder.uid.is_empty() {
            None
        } else if data.folders.iter().any(|f| f.uid == folder.uid) {
            Some(folder.uid.clone())
        } else {
            return Err(RecordError::UnknownFolder(folder.uid.clone()));
        };

        let duplicate = data
            .records
            .iter()
            .any(|r| r.folder == folder_uid && same_name(&r.record.title, &record.title));
        if duplicate && !force {
            return Err(RecordError::Duplicate {
                title: record.title,
                folder: folder.name.clone(),
            });
        }

        let uid = Uuid::new_v4().to_string();
        data.records.push(StoredRecord {
            folder: folder_uid,
            record_type: Some(record.record_type),
            record: CredentialRecord {
                uid: uid.clone(),
                title: record.title,
                login: record.login,
                url: record.url,
                fields: record.fields,
            },
        });
        if let Err(e) = self.save(&data) {
            data.records.pop();
            warn!(path = %self.path.display(), error = %e, "vault not saved, record discarded");
            return Err(e);
        }

        info!(%uid, folder = %folder.name, "record created");
        Ok(uid)
    }
}
