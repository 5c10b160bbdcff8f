//! Wires configuration into a running pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::broadcast::{BroadcastSink, Notification, NotificationSink};
use crate::config::{AutoJob, Config};
use crate::db::{Database, SqliteStore};
use crate::error::{Result, StoreError, SubmitError, WatchError};
use crate::ingest::Ingestor;
use crate::model::{DataFileRecord, JobStatus, ProcessingJob};
use crate::processor::ProcessorRegistry;
use crate::scheduler::{JobScheduler, SubmitReceipt, SubmitRequest};
use crate::storage::{LocalObjectStore, Storage};
use crate::store::{DataFileStore, JobStore, MemoryStore};
use crate::watcher::FileWatcher;
use crate::worker::{ChannelQueue, Executor, WorkerPool};

const JOB_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One fully wired pipeline: stores, storage, processors, workers and watcher.
///
/// Nothing starts until [`Tabflow::start`] (or the narrower
/// [`Tabflow::start_workers`] / [`Tabflow::start_watcher`]) is called.
pub struct Tabflow {
    config: Config,
    jobs: Arc<dyn JobStore>,
    files: Arc<dyn DataFileStore>,
    queue: Arc<ChannelQueue>,
    sink: Arc<BroadcastSink>,
    executor: Arc<Executor>,
    scheduler: Arc<JobScheduler>,
    ingestor: Arc<Ingestor>,
    /// PENDING jobs found in the store at build time, dispatched once workers start.
    recovered: Vec<ProcessingJob>,
    pool: Option<WorkerPool>,
    watcher: Option<FileWatcher>,
}

impl Tabflow {
    pub fn build(config: Config) -> Result<Self> {
        let registry = Arc::new(ProcessorRegistry::from_config(&config.processors)?);

        let (jobs, files) = match &config.database {
            Some(path) => {
                let store = Arc::new(open_sqlite(path)?);
                info!("Using SQLite job store at {}", path.display());
                let jobs: Arc<dyn JobStore> = store.clone();
                let files: Arc<dyn DataFileStore> = store;
                (jobs, files)
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                info!("Using in-memory job store");
                let jobs: Arc<dyn JobStore> = store.clone();
                let files: Arc<dyn DataFileStore> = store;
                (jobs, files)
            }
        };

        let storage: Arc<dyn Storage> = Arc::new(LocalObjectStore::new(&config.data_directory));
        let sink = Arc::new(BroadcastSink::default());
        let notify: Arc<dyn NotificationSink> = sink.clone();
        let queue = Arc::new(ChannelQueue::new(config.queue_capacity));

        let executor = Arc::new(
            Executor::new(
                jobs.clone(),
                storage.clone(),
                registry.clone(),
                notify.clone(),
            )
            .with_slow_job_warning(config.slow_job_warning()),
        );
        let scheduler = Arc::new(JobScheduler::new(
            jobs.clone(),
            files.clone(),
            registry,
            queue.clone(),
            notify.clone(),
        ));
        let ingestor = Arc::new(Ingestor::new(storage, files.clone(), notify));

        let interrupted = scheduler.fail_interrupted()?;
        let recovered = jobs.list_by_status(JobStatus::Pending)?;
        if interrupted > 0 || !recovered.is_empty() {
            info!(
                "Found {} pending jobs to resume; {} interrupted jobs marked failed",
                recovered.len(),
                interrupted
            );
        }

        Ok(Self {
            config,
            jobs,
            files,
            queue,
            sink,
            executor,
            scheduler,
            ingestor,
            recovered,
            pool: None,
            watcher: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts the workers and, when enabled, the directory watcher.
    pub fn start(&mut self) -> Result<()> {
        self.start_workers()?;
        if self.config.watch.enabled {
            self.start_watcher()?;
        } else {
            info!("Directory watching disabled");
        }
        Ok(())
    }

    pub fn start_workers(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        let pool = WorkerPool::start(
            self.queue.receiver(),
            self.config.worker_count,
            Arc::clone(&self.executor),
        )?;
        self.pool = Some(pool);

        for job in std::mem::take(&mut self.recovered) {
            match self.scheduler.redispatch(&job) {
                Ok(()) => debug!("Resumed job {} ({})", job.id, job.job_type),
                Err(e) => warn!("Job {} could not be resumed: {}", job.id, e),
            }
        }
        Ok(())
    }

    pub fn start_watcher(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let ingestor = Arc::clone(&self.ingestor);
        let scheduler = Arc::clone(&self.scheduler);
        let auto_jobs = self.config.auto_jobs.clone();

        let watcher = FileWatcher::start(
            &self.config.watch_directory,
            &self.config.watch,
            move |path: PathBuf| match ingestor.ingest_ready(&path) {
                Ok(Some(record)) => submit_auto_jobs(&scheduler, &auto_jobs, &record),
                Ok(None) => {}
                Err(e) => error!("{}", e),
            },
        )?;
        self.watcher = Some(watcher);
        Ok(())
    }

    pub fn submit(
        &self,
        request: SubmitRequest,
    ) -> std::result::Result<SubmitReceipt, SubmitError> {
        self.scheduler.submit(request)
    }

    /// Registers a local file directly, outside the watcher.
    pub fn register_upload(
        &self,
        path: &Path,
        metadata: Map<String, Value>,
    ) -> std::result::Result<DataFileRecord, WatchError> {
        self.ingestor.register_upload(path, metadata)
    }

    pub fn job(&self, id: &str) -> std::result::Result<Option<ProcessingJob>, StoreError> {
        self.jobs.get(id)
    }

    pub fn jobs_for_file(
        &self,
        data_file_id: &str,
    ) -> std::result::Result<Vec<ProcessingJob>, StoreError> {
        self.jobs.list_for_file(data_file_id)
    }

    pub fn data_files(&self) -> std::result::Result<Vec<DataFileRecord>, StoreError> {
        self.files.list()
    }

    /// Polls until the job reaches a terminal status or `timeout` passes.
    /// Returns the last stored state.
    pub fn wait_for_job(
        &self,
        id: &str,
        timeout: Duration,
    ) -> std::result::Result<Option<ProcessingJob>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.jobs.get(id)?;
            match &job {
                Some(j) if j.status.is_terminal() => return Ok(job),
                _ if Instant::now() >= deadline => return Ok(job),
                _ => std::thread::sleep(JOB_POLL_INTERVAL),
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sink.subscribe()
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn watcher(&self) -> Option<&FileWatcher> {
        self.watcher.as_ref()
    }

    /// Stops the watcher, closes the queue, and waits for workers to drain it.
    pub fn shutdown(self) {
        self.close(true);
    }

    /// Like [`Tabflow::shutdown`] but workers exit after their current job.
    /// Jobs still queued stay PENDING in the store and are resumed by the
    /// next start on the same database.
    pub fn stop(self) {
        self.close(false);
    }

    fn close(mut self, drain: bool) {
        if let Some(watcher) = self.watcher.take() {
            watcher.join();
        }
        if let Some(pool) = &self.pool {
            if !drain {
                pool.stop();
            }
        }
        let left = self.queue.len();
        self.queue.close();
        if let Some(pool) = self.pool.take() {
            pool.join();
        }
        if !drain && left > 0 {
            info!("{} queued jobs left pending", left);
        }
        info!("Shutdown complete");
    }
}

fn open_sqlite(path: &Path) -> Result<SqliteStore> {
    let db = Database::open(path).map_err(StoreError::Database)?;
    Ok(SqliteStore::new(db))
}

fn submit_auto_jobs(scheduler: &JobScheduler, auto_jobs: &[AutoJob], record: &DataFileRecord) {
    for auto in auto_jobs {
        let request = SubmitRequest::new(&record.id, &auto.job_type, auto.parameters.clone());
        match scheduler.try_submit(request) {
            Ok(receipt) => debug!(
                "Auto job {} ({}) queued for {}",
                receipt.job_id, auto.job_type, record.filename
            ),
            Err(e) => warn!(
                "Auto job {} for {} was not submitted: {}",
                auto.job_type, record.filename, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobStatus, ParameterBag};
    use serde_json::json;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::new(dir.path().join("incoming"), dir.path().join("data"));
        config.worker_count = 2;
        config.watch.enabled = false;
        config
    }

    #[test]
    fn test_upload_and_process_in_memory() {
        let dir = TempDir::new().unwrap();
        let mut app = Tabflow::build(config(&dir)).unwrap();
        app.start().unwrap();
        assert!(app.watcher().is_none());

        let csv = dir.path().join("series.csv");
        std::fs::write(&csv, "v\n1\n2\n3\n4\n5\n").unwrap();
        let record = app.register_upload(&csv, Map::new()).unwrap();

        let mut params = ParameterBag::new();
        params.insert("window_size".into(), json!(3));
        let receipt = app
            .submit(SubmitRequest::new(&record.id, "rolling_mean", params))
            .unwrap();

        let job = app
            .wait_for_job(&receipt.job_id, Duration::from_secs(10))
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.result.unwrap()["series"]["v_rolling_mean_3"],
            json!([1.5, 2.0, 3.0, 4.0, 4.5])
        );
        app.shutdown();
    }

    #[test]
    fn test_sqlite_store_selected_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.database = Some(dir.path().join("db").join("tabflow.db"));
        let app = Tabflow::build(config).unwrap();

        let csv = dir.path().join("a.csv");
        std::fs::write(&csv, "x\n1\n").unwrap();
        app.register_upload(&csv, Map::new()).unwrap();
        assert!(dir.path().join("db").join("tabflow.db").exists());
        assert_eq!(app.data_files().unwrap().len(), 1);
        app.shutdown();
    }

    #[test]
    fn test_stop_leaves_queued_jobs_for_next_start() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.database = Some(dir.path().join("tabflow.db"));
        let app = Tabflow::build(config.clone()).unwrap();

        let csv = dir.path().join("a.csv");
        std::fs::write(&csv, "x\n1\n2\n").unwrap();
        let record = app.register_upload(&csv, Map::new()).unwrap();
        let receipt = app
            .submit(SubmitRequest::new(&record.id, "data_quality", ParameterBag::new()))
            .unwrap();
        app.stop();

        let mut app = Tabflow::build(config).unwrap();
        assert_eq!(
            app.job(&receipt.job_id).unwrap().unwrap().status,
            JobStatus::Pending
        );
        app.start_workers().unwrap();
        let job = app
            .wait_for_job(&receipt.job_id, Duration::from_secs(10))
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        app.shutdown();
    }

    #[test]
    fn test_unknown_processor_fails_build() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.processors.enabled.push("fourier".into());
        assert!(Tabflow::build(config).is_err());
    }
}
