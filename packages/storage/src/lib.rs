//! Object storage for parsed upload sheets.
//!
//! The upload step writes each parsed file once under an opaque handle; the
//! batch engine reads it back by that handle when the job runs.
//!
//! Backends:
//! - On-disk storage for single-host deployments
//! - In-memory storage for tests

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bulk_core::SheetData;
use bytes::Bytes;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("sheet not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<object_store::Error> for StorageError {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::ObjectStore(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `STORAGE_BACKEND`: `filesystem` (default) or `memory`
    /// - `STORAGE_FS_ROOT`: filesystem root (default: `./data/sheets`)
    /// - `STORAGE_PREFIX`: optional key prefix
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").ok().and_then(non_empty);
        let prefix = std::env::var("STORAGE_PREFIX").ok().and_then(non_empty);

        let cfg = match backend.as_deref() {
            None | Some("filesystem") | Some("fs") => {
                let root = std::env::var("STORAGE_FS_ROOT")
                    .ok()
                    .and_then(non_empty)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/sheets"));
                Self::filesystem(root)
            }
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected filesystem|memory)"
                )));
            }
        };

        Ok(Self { prefix, ..cfg })
    }
}

/// Sheet store keyed by data handle.
#[derive(Clone)]
pub struct SheetStore {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl std::fmt::Debug for SheetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetStore")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl SheetStore {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as _)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _)
            }
        };

        tracing::info!(backend = kind.as_str(), "Sheet store ready");
        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?)
    }

    fn to_path(&self, handle: &str) -> Result<Path, StorageError> {
        let handle = handle.trim_matches('/');
        if handle.is_empty() {
            return Err(StorageError::InvalidConfig(
                "data handle must not be empty".to_string(),
            ));
        }

        let key = format!("sheets/{handle}.json");
        let joined = match self.prefix.as_deref() {
            Some(prefix) => {
                let prefix = prefix.trim_matches('/');
                if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}/{key}")
                }
            }
            None => key,
        };

        Ok(Path::from(joined))
    }

    /// Store a parsed sheet under `handle`, replacing any previous one.
    pub async fn put_sheet(&self, handle: &str, sheet: &SheetData) -> Result<(), StorageError> {
        let path = self.to_path(handle)?;
        let bytes = serde_json::to_vec(sheet)?;
        self.store
            .put(&path, object_store::PutPayload::from(Bytes::from(bytes)))
            .await?;
        tracing::debug!(handle, rows = sheet.len(), "Stored sheet");
        Ok(())
    }

    /// Load the sheet stored under `handle`.
    pub async fn get_sheet(&self, handle: &str) -> Result<SheetData, StorageError> {
        let path = self.to_path(handle)?;
        let res = self.store.get(&path).await?;
        let bytes = res.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Remove the sheet under `handle`. Missing sheets are not an error.
    pub async fn delete_sheet(&self, handle: &str) -> Result<(), StorageError> {
        let path = self.to_path(handle)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    fn sheet() -> SheetData {
        SheetData::new(
            vec!["task_id".into(), "Priority".into()],
            vec![
                vec!["abc".into(), "High".into()],
                vec!["def".into()],
            ],
        )
    }

    #[tokio::test]
    async fn in_memory_round_trip() -> Result<(), StorageError> {
        let store = SheetStore::new(StorageConfig::memory())?;
        store.put_sheet("upload-1", &sheet()).await?;
        let got = store.get_sheet("upload-1").await?;
        assert_eq!(got, sheet());
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_round_trip_with_prefix() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let store = SheetStore::new(StorageConfig::filesystem(dir.path()).with_prefix("tenant-a"))?;

        store.put_sheet("upload-2", &sheet()).await?;
        assert!(dir.path().join("tenant-a/sheets/upload-2.json").exists());
        assert_eq!(store.get_sheet("upload-2").await?.rows.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn missing_sheet_is_not_found() -> Result<(), StorageError> {
        let store = SheetStore::new(StorageConfig::memory())?;
        let err = store.get_sheet("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        store.delete_sheet("nope").await?;
        assert!(matches!(
            store.to_path("  ").unwrap_err(),
            StorageError::InvalidConfig(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_sheet() -> Result<(), StorageError> {
        let store = SheetStore::new(StorageConfig::memory())?;
        store.put_sheet("h", &sheet()).await?;
        store.delete_sheet("h").await?;
        assert!(store.get_sheet("h").await.is_err());
        Ok(())
    }
}
