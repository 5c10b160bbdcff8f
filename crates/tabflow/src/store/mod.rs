//! Persistence seams for jobs and data files.
//!
//! Both traits are object safe and shared as `Arc<dyn ...>`. Implementations
//! serialize concurrent status updates per job id so that exactly one of two
//! racing compare-and-set calls wins.

pub mod memory;

use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::model::{DataFileRecord, JobStatus, ProcessingJob, StatusUpdate};

pub use memory::MemoryStore;

pub trait JobStore: Send + Sync {
    /// Persists a new job and returns its id. Fails with `Duplicate` if the id exists.
    fn create(&self, job: &ProcessingJob) -> Result<String, StoreError>;

    /// Applies `update` only if the job is currently in `expected`.
    ///
    /// Returns `Ok(false)` when the job is missing or in another status. An
    /// edge that the lifecycle never allows is rejected with `IllegalTransition`.
    fn compare_and_set_status(
        &self,
        id: &str,
        expected: JobStatus,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError>;

    fn get(&self, id: &str) -> Result<Option<ProcessingJob>, StoreError>;

    /// Jobs for one data file, oldest first.
    fn list_for_file(&self, data_file_id: &str) -> Result<Vec<ProcessingJob>, StoreError>;

    /// Jobs currently in `status`, oldest first.
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<ProcessingJob>, StoreError>;
}

pub trait DataFileStore: Send + Sync {
    fn insert(&self, record: &DataFileRecord) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<DataFileRecord>, StoreError>;

    /// Adds or overwrites metadata keys and returns the updated record.
    fn merge_metadata(
        &self,
        id: &str,
        metadata: &Map<String, Value>,
    ) -> Result<DataFileRecord, StoreError>;

    /// All records, oldest first.
    fn list(&self) -> Result<Vec<DataFileRecord>, StoreError>;
}

/// Rejects edges outside the job lifecycle before touching storage.
pub(crate) fn check_transition(
    id: &str,
    expected: JobStatus,
    update: &StatusUpdate,
) -> Result<(), StoreError> {
    let next = update.status();
    if expected.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            job_id: id.to_string(),
            from: expected,
            to: next,
        })
    }
}
