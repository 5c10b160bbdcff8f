pub mod filesystem;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub use filesystem::LocalObjectStore;

/// Opaque pointer to an object held by a [`Storage`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageHandle(String);

impl StorageHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object storage collaborator. Failures are surfaced to the caller and never retried here.
pub trait Storage: Send + Sync {
    /// Copies a local file into storage and returns its handle.
    fn put(&self, local_path: &Path) -> Result<StorageHandle, StorageError>;

    /// Materializes an object as a local file that lives as long as the returned guard.
    fn get(&self, handle: &StorageHandle) -> Result<TempMaterialization, StorageError>;

    fn delete(&self, handle: &StorageHandle) -> Result<(), StorageError>;
}

/// Local copy of a stored object. The file is removed when the guard is dropped.
#[derive(Debug)]
pub struct TempMaterialization {
    path: PathBuf,
}

impl TempMaterialization {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempMaterialization {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::trace!("Removed materialization {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove materialization {:?}: {}", self.path, e),
        }
    }
}
