//! Runs a single dispatched job through its lifecycle.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::broadcast::{publish, Notification, NotificationSink};
use crate::error::{ErrorCategory, JobError};
use crate::model::{JobStatus, StatusUpdate};
use crate::processor::ProcessorRegistry;
use crate::storage::Storage;
use crate::store::JobStore;
use crate::table::Table;
use crate::worker::queue::Dispatch;

/// What happened to a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Failed(JobError),
    /// The job was not PENDING (already claimed or missing); nothing was done.
    NotClaimed,
    /// The terminal write lost its compare-and-set; the store was left untouched.
    Lost,
}

/// Shared by all workers of a pool.
pub struct Executor {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn Storage>,
    registry: Arc<ProcessorRegistry>,
    sink: Arc<dyn NotificationSink>,
    slow_job_warning: Duration,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Executor {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn Storage>,
        registry: Arc<ProcessorRegistry>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            storage,
            registry,
            sink,
            slow_job_warning: Duration::from_secs(60),
        }
    }

    pub fn with_slow_job_warning(mut self, threshold: Duration) -> Self {
        self.slow_job_warning = threshold;
        self
    }

    pub fn execute(&self, worker_id: &str, dispatch: &Dispatch) -> Outcome {
        let claim = StatusUpdate::Running {
            worker_id: worker_id.to_string(),
        };
        match self
            .store
            .compare_and_set_status(&dispatch.job_id, JobStatus::Pending, &claim)
        {
            Ok(true) => {}
            Ok(false) => {
                log::warn!(
                    "{}: job {} is not pending, skipping",
                    worker_id,
                    dispatch.job_id
                );
                return Outcome::NotClaimed;
            }
            Err(e) => {
                log::error!("{}: failed to claim job {}: {}", worker_id, dispatch.job_id, e);
                return Outcome::NotClaimed;
            }
        }
        self.notify(dispatch, JobStatus::Running);

        log::debug!(
            "{}: running {} for job {}",
            worker_id,
            dispatch.job_type,
            dispatch.job_id
        );
        let started = Instant::now();
        let result = self.run(dispatch);
        let elapsed = started.elapsed();
        if elapsed >= self.slow_job_warning {
            log::warn!(
                "Job {} ({}) took {:.1}s",
                dispatch.job_id,
                dispatch.job_type,
                elapsed.as_secs_f64()
            );
        }

        let (update, outcome) = match result {
            Ok(result) => (StatusUpdate::Completed { result }, Outcome::Completed),
            Err(error) => {
                log::warn!("Job {} failed: {}", dispatch.job_id, error);
                (
                    StatusUpdate::Failed {
                        error: error.clone(),
                    },
                    Outcome::Failed(error),
                )
            }
        };

        match self
            .store
            .compare_and_set_status(&dispatch.job_id, JobStatus::Running, &update)
        {
            Ok(true) => {
                self.notify(dispatch, update.status());
                outcome
            }
            Ok(false) => {
                log::error!(
                    "[{}] job {} left RUNNING before {} could record {}",
                    ErrorCategory::InvariantViolation,
                    dispatch.job_id,
                    worker_id,
                    update.status()
                );
                Outcome::Lost
            }
            Err(e) => {
                log::error!(
                    "[{}] failed to record {} for job {}: {}",
                    ErrorCategory::InvariantViolation,
                    update.status(),
                    dispatch.job_id,
                    e
                );
                Outcome::Lost
            }
        }
    }

    fn run(&self, dispatch: &Dispatch) -> Result<Value, JobError> {
        let processor = self.registry.get(&dispatch.job_type).ok_or_else(|| {
            JobError::new(
                ErrorCategory::Validation,
                format!("Unknown job type '{}'", dispatch.job_type),
            )
        })?;

        // Removed when this guard drops, whichever way we leave.
        let materialized = self
            .storage
            .get(&dispatch.storage_handle)
            .map_err(|e| JobError::from(&e))?;
        let table = Table::from_path(materialized.path()).map_err(|e| JobError::from(&e))?;

        let params = &dispatch.parameters;
        match panic::catch_unwind(AssertUnwindSafe(|| processor.process(table, params))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(JobError::from(&e)),
            Err(payload) => Err(JobError::new(
                ErrorCategory::Processor,
                format!("Processor panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }

    fn notify(&self, dispatch: &Dispatch, status: JobStatus) {
        publish(
            self.sink.as_ref(),
            Notification::job_status(&dispatch.job_id, &dispatch.data_file_id, status),
        );
    }
}
