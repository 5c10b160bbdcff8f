use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Unknown processor '{name}' (available: {available})")]
    UnknownProcessor { name: String, available: String },

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid environment override {var}='{value}': {reason}")]
    InvalidOverride {
        var: String,
        value: String,
        reason: String,
    },
}

/// Failure raised by a processor while handling a job.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error("Column '{0}' not found in the dataset")]
    ColumnNotFound(String),

    #[error("Column '{0}' is not numeric")]
    NonNumericColumn(String),

    #[error("No numeric columns found in the dataset")]
    NoNumericColumns,

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy file from '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object not found for handle '{0}'")]
    NotFound(String),

    #[error("Invalid storage handle '{0}'")]
    InvalidHandle(String),

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

/// Errors raised by job and data-file stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Illegal status transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: String,
        from: crate::model::JobStatus,
        to: crate::model::JobStatus,
    },

    #[error("Duplicate id '{0}'")]
    Duplicate(String),

    #[error("Record '{0}' not found")]
    NotFound(String),

    #[error("Corrupt record '{id}': {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Errors returned synchronously from `JobScheduler::submit`.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Data file '{0}' not found")]
    NotFound(String),

    #[error("Job {job_id} could not be dispatched: {reason}")]
    Dispatch { job_id: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SubmitError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SubmitError::Validation(_) => ErrorCategory::Validation,
            SubmitError::NotFound(_) => ErrorCategory::NotFound,
            SubmitError::Dispatch { .. } | SubmitError::Store(_) => ErrorCategory::TransientIo,
        }
    }
}

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification channel closed")]
    Closed,

    #[error("Failed to deliver notification: {0}")]
    Delivery(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker queue closed")]
    QueueClosed,

    #[error("Worker queue is full")]
    QueueFull,

    #[error("Worker pool size must be at least 1")]
    NoWorkers,
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to start watching '{path}': {reason}")]
    Start { path: PathBuf, reason: String },

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to spawn watcher thread: {0}")]
    SpawnFailed(String),

    #[error("Ingestion of '{path}' failed: {reason}")]
    Ingest { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed tabular content: {0}")]
    Malformed(#[from] csv::Error),

    #[error("Unsupported tabular format: {0}")]
    UnsupportedFormat(String),

    #[error("Row {row} has {found} fields, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Category recorded on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    TransientIo,
    Processor,
    InvariantViolation,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::TransientIo => "transient_io",
            ErrorCategory::Processor => "processor",
            ErrorCategory::InvariantViolation => "invariant_violation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validation" => Some(ErrorCategory::Validation),
            "not_found" => Some(ErrorCategory::NotFound),
            "transient_io" => Some(ErrorCategory::TransientIo),
            "processor" => Some(ErrorCategory::Processor),
            "invariant_violation" => Some(ErrorCategory::InvariantViolation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error summary stored on a FAILED job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub category: ErrorCategory,
    pub message: String,
}

impl JobError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

impl From<&ProcessError> for JobError {
    fn from(err: &ProcessError) -> Self {
        let category = match err {
            ProcessError::InvalidParameter { .. } => ErrorCategory::Validation,
            _ => ErrorCategory::Processor,
        };
        JobError::new(category, err.to_string())
    }
}

impl From<&StorageError> for JobError {
    fn from(err: &StorageError) -> Self {
        let category = match err {
            StorageError::NotFound(_) | StorageError::InvalidHandle(_) => ErrorCategory::NotFound,
            _ => ErrorCategory::TransientIo,
        };
        JobError::new(category, err.to_string())
    }
}

impl From<&TableError> for JobError {
    fn from(err: &TableError) -> Self {
        let category = match err {
            TableError::Read { .. } => ErrorCategory::TransientIo,
            _ => ErrorCategory::Validation,
        };
        JobError::new(category, format!("Data unreadable: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, TabflowError>;
