use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::data_file_repo::{self, DataFileRow};
use super::job_repo::{self, JobRow, TransitionRow};
use super::{Database, DatabaseError};
use crate::error::{ErrorCategory, JobError, StoreError};
use crate::model::{DataFileRecord, JobStatus, ProcessingJob, StatusUpdate};
use crate::storage::StorageHandle;
use crate::store::{check_transition, DataFileStore, JobStore};

/// Durable [`JobStore`] and [`DataFileStore`] on SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(id, format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_json(id: &str, raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| corrupt(id, format!("bad JSON: {}", e)))
}

fn parse_object(id: &str, raw: &str) -> Result<Map<String, Value>, StoreError> {
    match parse_json(id, raw)? {
        Value::Object(map) => Ok(map),
        other => Err(corrupt(id, format!("expected a JSON object, got {}", other))),
    }
}

fn corrupt(id: &str, reason: String) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason,
    }
}

fn duplicate_or(id: &str, err: DatabaseError) -> StoreError {
    if err.is_primary_key_violation() {
        StoreError::Duplicate(id.to_string())
    } else {
        StoreError::Database(err)
    }
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn job_to_row(job: &ProcessingJob) -> JobRow {
        JobRow {
            id: job.id.clone(),
            data_file_id: job.data_file_id.clone(),
            job_type: job.job_type.clone(),
            parameters: Value::Object(job.parameters.clone()).to_string(),
            status: job.status.as_str().to_string(),
            result: job.result.as_ref().map(Value::to_string),
            error_category: job.error.as_ref().map(|e| e.category.as_str().to_string()),
            error_message: job.error.as_ref().map(|e| e.message.clone()),
            correlation_id: job.correlation_id.clone(),
            created_at: timestamp(&job.created_at),
            updated_at: timestamp(&job.updated_at),
        }
    }

    fn row_to_job(row: JobRow) -> Result<ProcessingJob, StoreError> {
        let id = row.id.as_str();
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| corrupt(id, format!("unknown status '{}'", row.status)))?;

        let error = match (&row.error_category, &row.error_message) {
            (Some(category), Some(message)) => {
                let category = ErrorCategory::parse(category)
                    .ok_or_else(|| corrupt(id, format!("unknown error category '{}'", category)))?;
                Some(JobError::new(category, message.clone()))
            }
            _ => None,
        };

        Ok(ProcessingJob {
            parameters: parse_object(id, &row.parameters)?,
            result: row.result.as_deref().map(|r| parse_json(id, r)).transpose()?,
            created_at: parse_timestamp(id, &row.created_at)?,
            updated_at: parse_timestamp(id, &row.updated_at)?,
            error,
            status,
            id: row.id,
            data_file_id: row.data_file_id,
            job_type: row.job_type,
            correlation_id: row.correlation_id,
        })
    }

    fn transition_row(update: &StatusUpdate) -> TransitionRow {
        let mut row = TransitionRow {
            status: update.status().as_str().to_string(),
            updated_at: timestamp(&Utc::now()),
            result: None,
            error_category: None,
            error_message: None,
            correlation_id: None,
        };
        match update {
            StatusUpdate::Running { worker_id } => row.correlation_id = Some(worker_id.clone()),
            StatusUpdate::Completed { result } => row.result = Some(result.to_string()),
            StatusUpdate::Failed { error } => {
                row.error_category = Some(error.category.as_str().to_string());
                row.error_message = Some(error.message.clone());
            }
        }
        row
    }

    fn file_to_row(record: &DataFileRecord) -> DataFileRow {
        DataFileRow {
            id: record.id.clone(),
            filename: record.filename.clone(),
            storage_handle: record
                .storage_handle
                .as_ref()
                .map(|h| h.as_str().to_string()),
            metadata: Value::Object(record.metadata.clone()).to_string(),
            created_at: timestamp(&record.created_at),
        }
    }

    fn row_to_file(row: DataFileRow) -> Result<DataFileRecord, StoreError> {
        Ok(DataFileRecord {
            metadata: parse_object(&row.id, &row.metadata)?,
            created_at: parse_timestamp(&row.id, &row.created_at)?,
            storage_handle: row.storage_handle.map(StorageHandle::new),
            filename: row.filename,
            id: row.id,
        })
    }
}

impl JobStore for SqliteStore {
    fn create(&self, job: &ProcessingJob) -> Result<String, StoreError> {
        job_repo::insert(&self.db, &Self::job_to_row(job)).map_err(|e| duplicate_or(&job.id, e))?;
        Ok(job.id.clone())
    }

    fn compare_and_set_status(
        &self,
        id: &str,
        expected: JobStatus,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError> {
        check_transition(id, expected, update)?;
        Ok(job_repo::compare_and_set(
            &self.db,
            id,
            expected.as_str(),
            &Self::transition_row(update),
        )?)
    }

    fn get(&self, id: &str) -> Result<Option<ProcessingJob>, StoreError> {
        job_repo::find_by_id(&self.db, id)?
            .map(Self::row_to_job)
            .transpose()
    }

    fn list_for_file(&self, data_file_id: &str) -> Result<Vec<ProcessingJob>, StoreError> {
        job_repo::list_for_file(&self.db, data_file_id)?
            .into_iter()
            .map(Self::row_to_job)
            .collect()
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<ProcessingJob>, StoreError> {
        job_repo::list_by_status(&self.db, status.as_str())?
            .into_iter()
            .map(Self::row_to_job)
            .collect()
    }
}

impl DataFileStore for SqliteStore {
    fn insert(&self, record: &DataFileRecord) -> Result<(), StoreError> {
        data_file_repo::insert(&self.db, &Self::file_to_row(record))
            .map_err(|e| duplicate_or(&record.id, e))
    }

    fn get(&self, id: &str) -> Result<Option<DataFileRecord>, StoreError> {
        data_file_repo::find_by_id(&self.db, id)?
            .map(Self::row_to_file)
            .transpose()
    }

    fn merge_metadata(
        &self,
        id: &str,
        metadata: &Map<String, Value>,
    ) -> Result<DataFileRecord, StoreError> {
        let row = data_file_repo::update_metadata(&self.db, id, |stored| {
            let mut merged: Map<String, Value> = serde_json::from_str(stored).unwrap_or_default();
            for (key, value) in metadata {
                merged.insert(key.clone(), value.clone());
            }
            Ok(Value::Object(merged).to_string())
        })?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Self::row_to_file(row)
    }

    fn list(&self) -> Result<Vec<DataFileRecord>, StoreError> {
        data_file_repo::list(&self.db)?
            .into_iter()
            .map(Self::row_to_file)
            .collect()
    }
}
