// # File Storage
//
// File-based implementation of PersistedStorage with crash recovery.
//
// ## Purpose
//
// Keeps view watermarks across process restarts for headless consumers
// (the CLI, embedded hosts). The browser equivalent is localStorage.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Corruption detection: JSON validated on load
// - Automatic backup: `.backup` holds the last known good file
// - Recovery: falls back to the backup if the main file is corrupted
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "entries": {
//     "changebot:lastViewed:default": "1736424000000"
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::Error;
use crate::traits::PersistedStorage;

/// Storage file format version
const STORAGE_FILE_VERSION: &str = "1.0";

/// File-based storage with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use changebot_core::storage::FileStorage;
/// use changebot_core::traits::PersistedStorage;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let storage = FileStorage::new("/var/lib/changebot/storage.json").await?;
///     storage.set("changebot:lastViewed:default", "1736424000000").await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
    /// Serializes temp-file writes and renames
    write_lock: Mutex<()>,
}

#[derive(Debug)]
struct FileState {
    entries: HashMap<String, String>,
    dirty: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StorageFileFormat {
    version: String,
    entries: HashMap<String, String>,
}

impl FileStorage {
    /// Create or load a file storage
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing file
    /// 3. If it is corrupted, try the backup
    /// 4. If both fail, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::storage(format!(
                        "Failed to create storage directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let entries = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                entries,
                dirty: false,
            })),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the main storage file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, String>, Error> {
        match Self::load(path).await {
            Ok(entries) => {
                tracing::debug!("Loaded storage file: {} entries", entries.len());
                Ok(entries)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Storage file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty storage.");
                    return Ok(HashMap::new());
                }

                match Self::load(&backup_path).await {
                    Ok(entries) => {
                        tracing::info!("Recovered storage from backup: {} entries", entries.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore storage file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(entries)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty storage.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<HashMap<String, String>, Error> {
        if !path.exists() {
            tracing::debug!("Storage file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to read storage file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: StorageFileFormat = serde_json::from_str(&content)?;

        if file.version != STORAGE_FILE_VERSION {
            tracing::warn!(
                "Storage file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORAGE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.entries)
    }

    async fn write(&self) -> Result<(), Error> {
        let _writing = self.write_lock.lock().await;
        let json = {
            let guard = self.state.read().await;
            let file = StorageFileFormat {
                version: STORAGE_FILE_VERSION.to_string(),
                entries: guard.entries.clone(),
            };
            serde_json::to_string_pretty(&file)?
        };

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        self.state.write().await.dirty = false;
        tracing::trace!("Storage written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl PersistedStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.state.read().await.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        {
            let mut guard = self.state.write().await;
            guard.entries.insert(key.to_string(), value.to_string());
            guard.dirty = true;
        }
        self.write().await
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        {
            let mut guard = self.state.write().await;
            if guard.entries.remove(key).is_none() {
                return Ok(());
            }
            guard.dirty = true;
        }
        self.write().await
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.state.read().await.entries.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        if self.state.read().await.dirty {
            self.write().await
        } else {
            Ok(())
        }
    }
}
