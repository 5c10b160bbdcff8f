use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use super::filter::FileFilter;
use crate::error::WatchError;

/// One-shot sweep of the watched directory for files that already exist.
pub struct DirectoryScanner {
    root: PathBuf,
    recursive: bool,
    filter: FileFilter,
}

impl DirectoryScanner {
    pub fn new<P: AsRef<Path>>(root: P, recursive: bool, filter: FileFilter) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            recursive,
            filter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns supported, non-ignored files in path order. Unreadable entries
    /// below the root are skipped; an unreadable root is an error.
    pub fn scan(&self) -> Result<Vec<PathBuf>, WatchError> {
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(if self.recursive { usize::MAX } else { 1 })
            .sort_by_file_name();

        let mut found = Vec::new();
        let filter = &self.filter;
        let walk = walker.into_iter().filter_entry(|e| {
            e.depth() == 0 || !(e.file_type().is_dir() && filter.is_ignored(e.path()))
        });
        for entry in walk {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(WatchError::ScanFailed {
                        path: self.root.clone(),
                        source: e,
                    })
                }
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", self.root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if self.filter.accepts(path) {
                debug!("Found existing file: {}", path.display());
                found.push(path.to_path_buf());
            }
        }

        info!(
            "Scanned {} existing files in {}",
            found.len(),
            self.root.display()
        );
        Ok(found)
    }
}
