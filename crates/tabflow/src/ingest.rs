//! Turns settled files into stored [`DataFileRecord`]s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, info_span, warn};

use crate::broadcast::{publish, Notification, NotificationSink};
use crate::error::WatchError;
use crate::model::{DataFileRecord, DataSource};
use crate::storage::Storage;
use crate::store::DataFileStore;
use crate::table::Table;

enum Inspection {
    Readable { rows: usize, columns: usize },
    HeaderOnly,
    Unreadable(String),
}

fn inspect(path: &Path) -> Inspection {
    match Table::from_path(path) {
        Ok(table) if table.row_count() == 0 => Inspection::HeaderOnly,
        Ok(table) => Inspection::Readable {
            rows: table.row_count(),
            columns: table.column_count(),
        },
        Err(e) => Inspection::Unreadable(e.to_string()),
    }
}

pub struct Ingestor {
    storage: Arc<dyn Storage>,
    files: Arc<dyn DataFileStore>,
    sink: Arc<dyn NotificationSink>,
    ingested: Mutex<HashSet<PathBuf>>,
}

impl Ingestor {
    pub fn new(
        storage: Arc<dyn Storage>,
        files: Arc<dyn DataFileStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            storage,
            files,
            sink,
            ingested: Mutex::new(HashSet::new()),
        }
    }

    /// Ingests a file reported by the watcher.
    ///
    /// Returns `Ok(None)` when the file is skipped: already ingested, gone,
    /// empty, or a CSV without data rows. A failed ingestion forgets the path
    /// so a later change to the file retries it.
    pub fn ingest_ready(&self, path: &Path) -> Result<Option<DataFileRecord>, WatchError> {
        let _span = info_span!("ingest", path = %path.display()).entered();

        if !self.claim(path) {
            debug!("{} was already ingested", path.display());
            return Ok(None);
        }

        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => {
                debug!("{} no longer exists", path.display());
                self.forget(path);
                return Ok(None);
            }
        };
        if size == 0 {
            debug!("Skipping empty file {}", path.display());
            self.forget(path);
            return Ok(None);
        }

        let mut metadata = Map::new();
        metadata.insert("source".into(), json!(DataSource::Watch.as_str()));
        metadata.insert("timestamp".into(), json!(now()));
        metadata.insert("auto_detected".into(), json!(true));
        metadata.insert("file_size_bytes".into(), json!(size));
        metadata.insert("detection_time".into(), json!(now()));

        match inspect(path) {
            Inspection::HeaderOnly => {
                info!("Skipping {}: no data rows", path.display());
                self.forget(path);
                return Ok(None);
            }
            inspection => annotate(&mut metadata, path, inspection),
        }

        match self.store(path, metadata) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                self.forget(path);
                Err(e)
            }
        }
    }

    /// Registers a file handed over explicitly, bypassing stabilization.
    /// `extra` is merged into the record metadata.
    pub fn register_upload(
        &self,
        path: &Path,
        extra: Map<String, Value>,
    ) -> Result<DataFileRecord, WatchError> {
        let _span = info_span!("upload", path = %path.display()).entered();

        let size = std::fs::metadata(path)
            .map_err(|e| ingest_error(path, e))?
            .len();
        if size == 0 {
            return Err(ingest_error(path, "file is empty"));
        }

        let mut metadata = extra;
        metadata.insert("source".into(), json!(DataSource::Upload.as_str()));
        metadata.insert("timestamp".into(), json!(now()));
        metadata.insert("file_size_bytes".into(), json!(size));

        match inspect(path) {
            Inspection::HeaderOnly => return Err(ingest_error(path, "file has no data rows")),
            inspection => annotate(&mut metadata, path, inspection),
        }

        self.store(path, metadata)
    }

    pub fn is_ingested(&self, path: &Path) -> bool {
        self.ingested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    fn claim(&self, path: &Path) -> bool {
        self.ingested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf())
    }

    fn forget(&self, path: &Path) {
        self.ingested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    fn store(&self, path: &Path, metadata: Map<String, Value>) -> Result<DataFileRecord, WatchError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ingest_error(path, "path has no file name"))?;

        let handle = self.storage.put(path).map_err(|e| ingest_error(path, e))?;
        let record = DataFileRecord::new(&filename)
            .with_storage_handle(handle.clone())
            .with_metadata(metadata);

        if let Err(e) = self.files.insert(&record) {
            if let Err(cleanup) = self.storage.delete(&handle) {
                warn!("Failed to remove orphaned object {}: {}", handle, cleanup);
            }
            return Err(ingest_error(path, e));
        }

        info!(
            "Registered {} as data file {} ({})",
            filename,
            record.id,
            record.source().unwrap_or("unknown")
        );
        publish(self.sink.as_ref(), Notification::data_file(&record));
        Ok(record)
    }
}

fn annotate(metadata: &mut Map<String, Value>, path: &Path, inspection: Inspection) {
    match inspection {
        Inspection::Readable { rows, columns } => {
            debug!("{} has {} rows and {} columns", path.display(), rows, columns);
            metadata.insert("row_count".into(), json!(rows));
            metadata.insert("column_count".into(), json!(columns));
        }
        Inspection::Unreadable(reason) => {
            warn!("Could not validate {}: {}", path.display(), reason);
            metadata.insert("validation_warning".into(), json!(reason));
        }
        Inspection::HeaderOnly => {}
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn ingest_error(path: &Path, reason: impl std::fmt::Display) -> WatchError {
    WatchError::Ingest {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
