//! JSON file token store.
//!
//! The whole mapping lives in a single pretty-printed JSON object at
//! `<data dir>/herald/tokens.json` (platform data directory from
//! `directories`), read and written wholesale.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{StoreError, TokenRecords, TokenStore};

/// Disk-backed token store.
///
/// There is no cross-process locking; run one writer per file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by the given file.
    ///
    /// The file and its parent directories are created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the default storage path for the token file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "raibid-labs", "herald")
            .ok_or(StoreError::DataDirUnavailable)?;

        Ok(dirs.data_dir().join("tokens.json"))
    }

    /// Create a store at the default location.
    pub fn at_default_path() -> Result<Self, StoreError> {
        Ok(Self::new(Self::default_path()?))
    }

    /// Get the storage path for this store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenStore for JsonFileStore {
    async fn load(&self) -> Result<TokenRecords, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TokenRecords::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_str(&contents)?)
    }

    async fn save(&self, records: &TokenRecords) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, contents).await?;

        Ok(())
    }
}
