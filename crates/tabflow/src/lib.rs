//! Tabular file ingestion and job orchestration.
//!
//! A [`watcher::FileWatcher`] admits each settled file once, the
//! [`ingest::Ingestor`] stores it as a [`model::DataFileRecord`], and the
//! [`scheduler::JobScheduler`] runs processing jobs against it on a
//! [`worker::WorkerPool`]. Every job status change is published to a
//! [`broadcast::NotificationSink`]. [`Tabflow`] wires it all together.

pub mod app;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod processor;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod table;
pub mod watcher;
pub mod worker;

pub use app::Tabflow;
pub use broadcast::{BroadcastSink, Notification, NotificationSink};
pub use config::{load_config, Config};
pub use error::{
    ConfigError, ErrorCategory, JobError, ProcessError, Result, StorageError, StoreError,
    SubmitError, TabflowError, WatchError, WorkerError,
};
pub use ingest::Ingestor;
pub use model::{DataFileRecord, JobStatus, ParameterBag, ProcessingJob};
pub use processor::{Processor, ProcessorRegistry};
pub use scheduler::{JobScheduler, SubmitReceipt, SubmitRequest};
pub use storage::{LocalObjectStore, Storage, StorageHandle};
pub use store::{DataFileStore, JobStore, MemoryStore};
pub use table::Table;
pub use watcher::FileWatcher;
pub use worker::WorkerPool;
