use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;

/// Opaque parameters handed to a processor. Only the processor interprets them.
pub type ParameterBag = serde_json::Map<String, Value>;

/// Lifecycle status of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Returns true for COMPLETED and FAILED.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The only legal edges are PENDING -> RUNNING -> {COMPLETED, FAILED}, plus
    /// PENDING -> FAILED for jobs that could never be dispatched.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The target of a compare-and-set transition together with the fields it writes.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Running { worker_id: String },
    Completed { result: Value },
    Failed { error: JobError },
}

impl StatusUpdate {
    pub fn status(&self) -> JobStatus {
        match self {
            StatusUpdate::Running { .. } => JobStatus::Running,
            StatusUpdate::Completed { .. } => JobStatus::Completed,
            StatusUpdate::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// A request to run one processor over one data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub id: String,
    pub data_file_id: String,
    pub job_type: String,
    #[serde(default)]
    pub parameters: ParameterBag,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Id of the worker that claimed the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ProcessingJob {
    /// Creates a new PENDING job with a fresh id.
    pub fn new(data_file_id: &str, job_type: &str, parameters: ParameterBag) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            data_file_id: data_file_id.to_string(),
            job_type: job_type.to_string(),
            parameters,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            correlation_id: None,
        }
    }

    /// Writes the fields carried by `update`. Callers are responsible for the
    /// compare-and-set check; this only keeps result and error exclusive.
    pub fn apply(&mut self, update: &StatusUpdate, at: DateTime<Utc>) {
        self.status = update.status();
        self.updated_at = at;
        match update {
            StatusUpdate::Running { worker_id } => {
                self.correlation_id = Some(worker_id.clone());
            }
            StatusUpdate::Completed { result } => {
                self.result = Some(result.clone());
                self.error = None;
            }
            StatusUpdate::Failed { error } => {
                self.error = Some(error.clone());
                self.result = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use serde_json::json;

    #[test]
    fn test_new_job_is_pending() {
        let job = ProcessingJob::new("file-1", "rolling_mean", ParameterBag::new());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.id.is_empty());
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn test_transition_table() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Running.can_transition_to(Running));
        for terminal in [Completed, Failed] {
            for next in [Pending, Running, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_apply_keeps_result_and_error_exclusive() {
        let mut job = ProcessingJob::new("file-1", "data_quality", ParameterBag::new());
        let now = Utc::now();
        job.apply(
            &StatusUpdate::Running {
                worker_id: "worker-0".into(),
            },
            now,
        );
        assert_eq!(job.correlation_id.as_deref(), Some("worker-0"));

        job.apply(
            &StatusUpdate::Failed {
                error: JobError::new(ErrorCategory::Processor, "boom"),
            },
            now,
        );
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert_eq!(job.error.as_ref().unwrap().message, "boom");
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let mut job = ProcessingJob::new("file-1", "rolling_mean", ParameterBag::new());
        job.apply(
            &StatusUpdate::Completed {
                result: json!({"ok": true}),
            },
            Utc::now(),
        );
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["dataFileId"], "file-1");
        assert_eq!(value["jobType"], "rolling_mean");
        assert_eq!(value["status"], "completed");
        assert!(value.get("error").is_none());
    }
}
