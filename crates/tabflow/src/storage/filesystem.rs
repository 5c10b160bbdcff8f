use std::path::{Component, Path, PathBuf};

use crate::error::StorageError;
use crate::storage::{Storage, StorageHandle, TempMaterialization};

/// Move a file from `src` to `dst`. Uses `rename` first (atomic on the same
/// filesystem) and falls back to copy + delete for cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::CopyFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::DeleteFile {
        path: src.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Copies `src` into a file that must not exist yet (O_CREAT | O_EXCL).
fn copy_exclusive(src: &Path, dst: &Path) -> Result<u64, StorageError> {
    let mut reader = std::fs::File::open(src).map_err(|e| StorageError::CopyFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;

    let mut writer = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(StorageError::FileExists(dst.to_path_buf()));
        }
        Err(e) => {
            return Err(StorageError::WriteFile {
                path: dst.to_path_buf(),
                source: e,
            });
        }
    };

    std::io::copy(&mut reader, &mut writer).map_err(|e| StorageError::CopyFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })
}

/// Object store backed by a local directory.
///
/// Objects live under `<data_dir>/objects/raw/<uuid>/<filename>`; materializations
/// handed to workers are written under `<data_dir>/scratch/`.
pub struct LocalObjectStore {
    objects_directory: PathBuf,
    scratch_directory: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(data_directory: P) -> Self {
        let data_directory = data_directory.as_ref();
        Self {
            objects_directory: data_directory.join("objects"),
            scratch_directory: data_directory.join("scratch"),
        }
    }

    pub fn objects_directory(&self) -> &Path {
        &self.objects_directory
    }

    pub fn scratch_directory(&self) -> &Path {
        &self.scratch_directory
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Maps a handle to its object path, rejecting anything that could escape
    /// the objects directory.
    fn resolve(&self, handle: &StorageHandle) -> Result<PathBuf, StorageError> {
        let key = Path::new(handle.as_str());
        let well_formed = !handle.as_str().is_empty()
            && key
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !well_formed {
            return Err(StorageError::InvalidHandle(handle.to_string()));
        }
        Ok(self.objects_directory.join(key))
    }
}

impl Storage for LocalObjectStore {
    fn put(&self, local_path: &Path) -> Result<StorageHandle, StorageError> {
        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidHandle(local_path.display().to_string()))?;

        let handle = StorageHandle::new(format!("raw/{}/{}", uuid::Uuid::new_v4(), filename));
        let destination = self.resolve(&handle)?;
        let parent = destination
            .parent()
            .ok_or_else(|| StorageError::InvalidHandle(handle.to_string()))?;
        self.ensure_directory(parent)?;

        // Readers never observe a half-written object.
        let partial = parent.join(format!(".{}.partial", filename));
        if let Err(e) = copy_exclusive(local_path, &partial) {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
        move_file(&partial, &destination)?;

        log::debug!("Stored {:?} as {}", local_path, handle);
        Ok(handle)
    }

    fn get(&self, handle: &StorageHandle) -> Result<TempMaterialization, StorageError> {
        let source = self.resolve(handle)?;
        if !source.is_file() {
            return Err(StorageError::NotFound(handle.to_string()));
        }

        self.ensure_directory(&self.scratch_directory)?;
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let target = self
            .scratch_directory
            .join(format!("{}-{}", uuid::Uuid::new_v4(), filename));

        let guard = TempMaterialization::new(target.clone());
        copy_exclusive(&source, &target)?;
        Ok(guard)
    }

    fn delete(&self, handle: &StorageHandle) -> Result<(), StorageError> {
        let path = self.resolve(handle)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(handle.to_string()));
            }
            Err(e) => return Err(StorageError::DeleteFile { path, source: e }),
        }

        // The per-object directory is empty now.
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir(parent);
        }
        Ok(())
    }
}
