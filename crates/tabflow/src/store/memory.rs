use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::model::{DataFileRecord, JobStatus, ProcessingJob, StatusUpdate};
use crate::store::{check_transition, DataFileStore, JobStore};

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, ProcessingJob>,
    files: HashMap<String, DataFileRecord>,
}

/// Non-durable store for tests and ephemeral runs.
///
/// Everything sits behind one `RwLock`; compare-and-set takes the write lock,
/// so the status check and the write are a single step.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl JobStore for MemoryStore {
    fn create(&self, job: &ProcessingJob) -> Result<String, StoreError> {
        let mut inner = self.write()?;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id.clone()));
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(job.id.clone())
    }

    fn compare_and_set_status(
        &self,
        id: &str,
        expected: JobStatus,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError> {
        check_transition(id, expected, update)?;

        let mut inner = self.write()?;
        match inner.jobs.get_mut(id) {
            Some(job) if job.status == expected => {
                job.apply(update, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self, id: &str) -> Result<Option<ProcessingJob>, StoreError> {
        Ok(self.read()?.jobs.get(id).cloned())
    }

    fn list_for_file(&self, data_file_id: &str) -> Result<Vec<ProcessingJob>, StoreError> {
        let inner = self.read()?;
        let mut jobs: Vec<ProcessingJob> = inner
            .jobs
            .values()
            .filter(|j| j.data_file_id == data_file_id)
            .cloned()
            .collect();
        sort_oldest_first(&mut jobs);
        Ok(jobs)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<ProcessingJob>, StoreError> {
        let inner = self.read()?;
        let mut jobs: Vec<ProcessingJob> = inner
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        sort_oldest_first(&mut jobs);
        Ok(jobs)
    }
}

fn sort_oldest_first(jobs: &mut [ProcessingJob]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

impl DataFileStore for MemoryStore {
    fn insert(&self, record: &DataFileRecord) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if inner.files.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        inner.files.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<DataFileRecord>, StoreError> {
        Ok(self.read()?.files.get(id).cloned())
    }

    fn merge_metadata(
        &self,
        id: &str,
        metadata: &Map<String, Value>,
    ) -> Result<DataFileRecord, StoreError> {
        let mut inner = self.write()?;
        let record = inner
            .files
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.merge_metadata(metadata);
        Ok(record.clone())
    }

    fn list(&self) -> Result<Vec<DataFileRecord>, StoreError> {
        let inner = self.read()?;
        let mut records: Vec<DataFileRecord> = inner.files.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, JobError};
    use crate::model::ParameterBag;
    use serde_json::json;
    use std::sync::{Arc, Barrier};

    fn running() -> StatusUpdate {
        StatusUpdate::Running {
            worker_id: "worker-0".into(),
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = MemoryStore::new();
        let job = ProcessingJob::new("file-1", "rolling_mean", ParameterBag::new());
        let id = store.create(&job).unwrap();

        let loaded = JobStore::get(&store, &id).unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(matches!(
            store.create(&job).unwrap_err(),
            StoreError::Duplicate(_)
        ));
    }

    #[test]
    fn test_cas_requires_expected_status() {
        let store = MemoryStore::new();
        let job = ProcessingJob::new("file-1", "rolling_mean", ParameterBag::new());
        store.create(&job).unwrap();

        let done = StatusUpdate::Completed {
            result: json!({"ok": true}),
        };
        assert!(!store
            .compare_and_set_status(&job.id, JobStatus::Running, &done)
            .unwrap());
        assert!(store
            .compare_and_set_status(&job.id, JobStatus::Pending, &running())
            .unwrap());
        assert!(store
            .compare_and_set_status(&job.id, JobStatus::Running, &done)
            .unwrap());

        let loaded = JobStore::get(&store, &job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.result, Some(json!({"ok": true})));
        assert_eq!(loaded.correlation_id.as_deref(), Some("worker-0"));
    }

    #[test]
    fn test_cas_rejects_illegal_edges() {
        let store = MemoryStore::new();
        let job = ProcessingJob::new("file-1", "rolling_mean", ParameterBag::new());
        store.create(&job).unwrap();

        let err = store
            .compare_and_set_status(
                &job.id,
                JobStatus::Pending,
                &StatusUpdate::Completed { result: json!({}) },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[test]
    fn test_cas_on_missing_job_is_false() {
        let store = MemoryStore::new();
        assert!(!store
            .compare_and_set_status("ghost", JobStatus::Pending, &running())
            .unwrap());
    }

    #[test]
    fn test_concurrent_terminal_cas_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let job = ProcessingJob::new("file-1", "rolling_mean", ParameterBag::new());
        store.create(&job).unwrap();
        store
            .compare_and_set_status(&job.id, JobStatus::Pending, &running())
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let updates = [
            StatusUpdate::Completed { result: json!(1) },
            StatusUpdate::Failed {
                error: JobError::new(ErrorCategory::Processor, "x"),
            },
        ];
        let handles: Vec<_> = updates
            .into_iter()
            .map(|update| {
                let store = store.clone();
                let barrier = barrier.clone();
                let id = job.id.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store
                        .compare_and_set_status(&id, JobStatus::Running, &update)
                        .unwrap()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_list_for_file_filters() {
        let store = MemoryStore::new();
        let a = ProcessingJob::new("file-a", "data_quality", ParameterBag::new());
        let b = ProcessingJob::new("file-b", "data_quality", ParameterBag::new());
        store.create(&a).unwrap();
        store.create(&b).unwrap();

        let jobs = store.list_for_file("file-a").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, a.id);
    }

    #[test]
    fn test_list_by_status_filters() {
        let store = MemoryStore::new();
        let a = ProcessingJob::new("file-a", "data_quality", ParameterBag::new());
        let b = ProcessingJob::new("file-a", "rolling_mean", ParameterBag::new());
        store.create(&a).unwrap();
        store.create(&b).unwrap();
        store
            .compare_and_set_status(&b.id, JobStatus::Pending, &running())
            .unwrap();

        let pending = store.list_by_status(JobStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
        assert_eq!(store.list_by_status(JobStatus::Running).unwrap()[0].id, b.id);
        assert!(store.list_by_status(JobStatus::Failed).unwrap().is_empty());
    }

    #[test]
    fn test_data_file_metadata_merge() {
        let store = MemoryStore::new();
        let record = DataFileRecord::new("a.csv");
        store.insert(&record).unwrap();

        let mut extra = Map::new();
        extra.insert("row_count".into(), json!(3));
        let updated = store.merge_metadata(&record.id, &extra).unwrap();
        assert_eq!(updated.metadata["row_count"], 3);
        assert_eq!(DataFileStore::get(&store, &record.id).unwrap(), Some(updated));

        assert!(matches!(
            store.merge_metadata("missing", &extra).unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
