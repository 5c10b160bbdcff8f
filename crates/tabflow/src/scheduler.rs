//! Job submission: validate, persist as PENDING, then dispatch exactly once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broadcast::{publish, Notification, NotificationSink};
use crate::error::{ErrorCategory, JobError, StoreError, SubmitError, WorkerError};
use crate::model::{JobStatus, ParameterBag, ProcessingJob, StatusUpdate};
use crate::processor::ProcessorRegistry;
use crate::store::{DataFileStore, JobStore};
use crate::worker::{Dispatch, JobQueue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub data_file_id: String,
    pub job_type: String,
    #[serde(default)]
    pub parameters: ParameterBag,
}

impl SubmitRequest {
    pub fn new(data_file_id: &str, job_type: &str, parameters: ParameterBag) -> Self {
        Self {
            data_file_id: data_file_id.to_string(),
            job_type: job_type.to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: JobStatus,
}

pub struct JobScheduler {
    jobs: Arc<dyn JobStore>,
    files: Arc<dyn DataFileStore>,
    registry: Arc<ProcessorRegistry>,
    queue: Arc<dyn JobQueue>,
    sink: Arc<dyn NotificationSink>,
}

impl JobScheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        files: Arc<dyn DataFileStore>,
        registry: Arc<ProcessorRegistry>,
        queue: Arc<dyn JobQueue>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            jobs,
            files,
            registry,
            queue,
            sink,
        }
    }

    /// Validates and records a job, then hands it to the workers.
    ///
    /// Validation and lookup failures return before anything is written.
    /// Waits for room when the worker queue is full.
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, SubmitError> {
        self.submit_with(request, |queue, dispatch| queue.enqueue(dispatch))
    }

    /// Like [`JobScheduler::submit`] but never waits on the worker queue.
    /// A job that finds the queue full is recorded as FAILED and returned as
    /// a `Dispatch` error.
    pub fn try_submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, SubmitError> {
        self.submit_with(request, |queue, dispatch| queue.try_enqueue(dispatch))
    }

    fn submit_with<F>(&self, request: SubmitRequest, send: F) -> Result<SubmitReceipt, SubmitError>
    where
        F: FnOnce(&dyn JobQueue, Dispatch) -> Result<(), WorkerError>,
    {
        let file = self
            .files
            .get(&request.data_file_id)?
            .ok_or_else(|| SubmitError::NotFound(request.data_file_id.clone()))?;

        let processor = self.registry.get(&request.job_type).ok_or_else(|| {
            SubmitError::Validation(format!(
                "Unknown job type '{}' (available: {})",
                request.job_type,
                self.registry.job_types().join(", ")
            ))
        })?;
        processor
            .validate(&request.parameters)
            .map_err(|e| SubmitError::Validation(e.to_string()))?;

        let storage_handle = file.storage_handle.clone().ok_or_else(|| {
            SubmitError::Validation(format!("Data file '{}' has no stored content", file.id))
        })?;

        let job = ProcessingJob::new(&file.id, &request.job_type, request.parameters);
        let job_id = self.jobs.create(&job)?;
        publish(self.sink.as_ref(), Notification::job(&job));
        log::info!(
            "Submitted job {} ({}) for {}",
            job_id,
            job.job_type,
            file.filename
        );

        let dispatch = Dispatch {
            job_id: job_id.clone(),
            data_file_id: job.data_file_id.clone(),
            job_type: job.job_type.clone(),
            parameters: job.parameters.clone(),
            storage_handle,
        };
        if let Err(e) = send(self.queue.as_ref(), dispatch) {
            self.fail_undispatched(&job, &e.to_string());
            return Err(SubmitError::Dispatch {
                job_id,
                reason: e.to_string(),
            });
        }

        Ok(SubmitReceipt {
            job_id,
            status: JobStatus::Pending,
        })
    }

    /// A job the workers will never see must not stay PENDING.
    fn fail_undispatched(&self, job: &ProcessingJob, reason: &str) {
        let update = StatusUpdate::Failed {
            error: JobError::new(
                ErrorCategory::TransientIo,
                format!("Dispatch failed: {}", reason),
            ),
        };
        match self
            .jobs
            .compare_and_set_status(&job.id, JobStatus::Pending, &update)
        {
            Ok(true) => publish(
                self.sink.as_ref(),
                Notification::job_status(&job.id, &job.data_file_id, JobStatus::Failed),
            ),
            Ok(false) => log::warn!("Job {} changed state before it could be failed", job.id),
            Err(e) => log::error!("Failed to mark job {} as failed: {}", job.id, e),
        }
    }

    /// Re-dispatches a stored PENDING job whose earlier dispatch was lost.
    /// A job that cannot be dispatched again is marked FAILED.
    pub(crate) fn redispatch(&self, job: &ProcessingJob) -> Result<(), SubmitError> {
        let result = self.resend(job);
        if let Err(e) = &result {
            self.fail_undispatched(job, &e.to_string());
        }
        result
    }

    fn resend(&self, job: &ProcessingJob) -> Result<(), SubmitError> {
        let storage_handle = self
            .files
            .get(&job.data_file_id)?
            .and_then(|f| f.storage_handle)
            .ok_or_else(|| SubmitError::NotFound(job.data_file_id.clone()))?;

        let dispatch = Dispatch {
            job_id: job.id.clone(),
            data_file_id: job.data_file_id.clone(),
            job_type: job.job_type.clone(),
            parameters: job.parameters.clone(),
            storage_handle,
        };
        self.queue
            .enqueue(dispatch)
            .map_err(|e| SubmitError::Dispatch {
                job_id: job.id.clone(),
                reason: e.to_string(),
            })
    }

    /// Fails every RUNNING job. Only safe before any worker has started,
    /// when such jobs can only be left over from a previous process.
    pub(crate) fn fail_interrupted(&self) -> Result<usize, StoreError> {
        let update = StatusUpdate::Failed {
            error: JobError::new(
                ErrorCategory::TransientIo,
                "Job was interrupted before it finished",
            ),
        };
        let mut failed = 0;
        for job in self.jobs.list_by_status(JobStatus::Running)? {
            if self
                .jobs
                .compare_and_set_status(&job.id, JobStatus::Running, &update)?
            {
                publish(
                    self.sink.as_ref(),
                    Notification::job_status(&job.id, &job.data_file_id, JobStatus::Failed),
                );
                failed += 1;
            }
        }
        Ok(failed)
    }

    pub fn job(&self, id: &str) -> Result<Option<ProcessingJob>, SubmitError> {
        Ok(self.jobs.get(id)?)
    }

    pub fn jobs_for_file(&self, data_file_id: &str) -> Result<Vec<ProcessingJob>, SubmitError> {
        Ok(self.jobs.list_for_file(data_file_id)?)
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotificationError;
    use crate::model::DataFileRecord;
    use crate::storage::StorageHandle;
    use crate::store::MemoryStore;
    use crate::worker::ChannelQueue;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Notification>>);

    impl NotificationSink for Recorder {
        fn publish(&self, n: &Notification) -> Result<(), NotificationError> {
            self.0.lock().unwrap().push(n.clone());
            Ok(())
        }
    }

    struct ClosedQueue;

    impl JobQueue for ClosedQueue {
        fn enqueue(&self, _: Dispatch) -> Result<(), WorkerError> {
            Err(WorkerError::QueueClosed)
        }

        fn try_enqueue(&self, _: Dispatch) -> Result<(), WorkerError> {
            Err(WorkerError::QueueClosed)
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        queue: Arc<ChannelQueue>,
        sink: Arc<Recorder>,
        scheduler: JobScheduler,
        file_id: String,
    }

    fn harness_with(queue: Arc<dyn JobQueue>, channel: Arc<ChannelQueue>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(Recorder::default());
        let record = DataFileRecord::new("a.csv")
            .with_storage_handle(StorageHandle::new("raw/1/a.csv"));
        store.insert(&record).unwrap();

        let scheduler = JobScheduler::new(
            store.clone(),
            store.clone(),
            Arc::new(ProcessorRegistry::builtin()),
            queue,
            sink.clone(),
        );
        Harness {
            store,
            queue: channel,
            sink,
            scheduler,
            file_id: record.id,
        }
    }

    fn harness() -> Harness {
        let channel = Arc::new(ChannelQueue::new(8));
        harness_with(channel.clone(), channel)
    }

    #[test]
    fn test_submit_persists_pending_and_dispatches() {
        let h = harness();
        let mut params = ParameterBag::new();
        params.insert("window_size".into(), json!(3));

        let receipt = h
            .scheduler
            .submit(SubmitRequest::new(&h.file_id, "rolling_mean", params.clone()))
            .unwrap();
        assert_eq!(receipt.status, JobStatus::Pending);

        let job = h.scheduler.job(&receipt.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.parameters, params);

        let dispatch = h.queue.receiver().try_recv().unwrap();
        assert_eq!(dispatch.job_id, receipt.job_id);
        assert_eq!(dispatch.storage_handle.as_str(), "raw/1/a.csv");
        assert!(h.queue.is_empty());

        let events = h.sink.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Notification::Job { status: JobStatus::Pending, .. }));
    }

    #[test]
    fn test_unknown_file_is_not_found() {
        let h = harness();
        let err = h
            .scheduler
            .submit(SubmitRequest::new("missing", "rolling_mean", ParameterBag::new()))
            .unwrap_err();
        assert!(matches!(err, SubmitError::NotFound(_)));
        assert!(h.queue.is_empty());
        assert!(h.store.list_for_file("missing").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_job_type_is_validation() {
        let h = harness();
        let err = h
            .scheduler
            .submit(SubmitRequest::new(&h.file_id, "fourier", ParameterBag::new()))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(h.scheduler.jobs_for_file(&h.file_id).unwrap().is_empty());
    }

    #[test]
    fn test_processor_validation_rejects_parameters() {
        let h = harness();
        let params = json!({"columns": 7}).as_object().cloned().unwrap();
        let err = h
            .scheduler
            .submit(SubmitRequest::new(&h.file_id, "rolling_mean", params))
            .unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));
        assert!(h.scheduler.jobs_for_file(&h.file_id).unwrap().is_empty());
    }

    #[test]
    fn test_file_without_content_is_validation() {
        let h = harness();
        let bare = DataFileRecord::new("bare.csv");
        h.store.insert(&bare).unwrap();
        let err = h
            .scheduler
            .submit(SubmitRequest::new(&bare.id, "data_quality", ParameterBag::new()))
            .unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));
    }

    #[test]
    fn test_dispatch_failure_marks_job_failed() {
        let h = harness_with(Arc::new(ClosedQueue), Arc::new(ChannelQueue::new(1)));
        let err = h
            .scheduler
            .submit(SubmitRequest::new(&h.file_id, "data_quality", ParameterBag::new()))
            .unwrap_err();

        let job_id = match err {
            SubmitError::Dispatch { job_id, .. } => job_id,
            other => panic!("unexpected {:?}", other),
        };
        let job = h.scheduler.job(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().category, ErrorCategory::TransientIo);
        assert_eq!(h.sink.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_try_submit_fails_job_when_queue_is_full() {
        let channel = Arc::new(ChannelQueue::new(1));
        let h = harness_with(channel.clone(), channel);

        let first = h
            .scheduler
            .try_submit(SubmitRequest::new(&h.file_id, "data_quality", ParameterBag::new()))
            .unwrap();
        let err = h
            .scheduler
            .try_submit(SubmitRequest::new(&h.file_id, "data_quality", ParameterBag::new()))
            .unwrap_err();

        let rejected = match err {
            SubmitError::Dispatch { job_id, reason } => {
                assert!(reason.contains("full"), "{}", reason);
                job_id
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            h.scheduler.job(&first.job_id).unwrap().unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(
            h.scheduler.job(&rejected).unwrap().unwrap().status,
            JobStatus::Failed
        );
        assert_eq!(h.queue.len(), 1);
    }

    #[test]
    fn test_redispatch_requeues_stored_job() {
        let h = harness();
        let job = ProcessingJob::new(&h.file_id, "data_quality", ParameterBag::new());
        h.store.create(&job).unwrap();

        h.scheduler.redispatch(&job).unwrap();
        let dispatch = h.queue.receiver().try_recv().unwrap();
        assert_eq!(dispatch.job_id, job.id);
        assert_eq!(dispatch.storage_handle.as_str(), "raw/1/a.csv");
    }

    #[test]
    fn test_redispatch_without_file_fails_job() {
        let h = harness();
        let job = ProcessingJob::new("gone", "data_quality", ParameterBag::new());
        h.store.create(&job).unwrap();

        let err = h.scheduler.redispatch(&job).unwrap_err();
        assert!(matches!(err, SubmitError::NotFound(_)));
        assert!(h.queue.is_empty());
        let stored = h.scheduler.job(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.unwrap().category, ErrorCategory::TransientIo);
    }

    #[test]
    fn test_fail_interrupted_only_touches_running_jobs() {
        let h = harness();
        let waiting = ProcessingJob::new(&h.file_id, "data_quality", ParameterBag::new());
        let started = ProcessingJob::new(&h.file_id, "rolling_mean", ParameterBag::new());
        h.store.create(&waiting).unwrap();
        h.store.create(&started).unwrap();
        h.store
            .compare_and_set_status(
                &started.id,
                JobStatus::Pending,
                &StatusUpdate::Running {
                    worker_id: "tabflow-worker-0".into(),
                },
            )
            .unwrap();

        assert_eq!(h.scheduler.fail_interrupted().unwrap(), 1);
        let stored = h.scheduler.job(&started.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().message.contains("interrupted"));
        assert_eq!(
            h.scheduler.job(&waiting.id).unwrap().unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(h.scheduler.fail_interrupted().unwrap(), 0);
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: SubmitRequest = serde_json::from_value(json!({
            "dataFileId": "f1",
            "jobType": "data_quality"
        }))
        .unwrap();
        assert_eq!(request.data_file_id, "f1");
        assert!(request.parameters.is_empty());

        let receipt = SubmitReceipt {
            job_id: "j1".into(),
            status: JobStatus::Pending,
        };
        assert_eq!(
            serde_json::to_value(receipt).unwrap(),
            json!({"jobId": "j1", "status": "pending"})
        );
    }
}
