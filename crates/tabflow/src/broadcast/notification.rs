use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::NotificationError;
use crate::model::{DataFileRecord, JobStatus, ProcessingJob};

/// What happened to the subject of a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Created,
    Started,
    Completed,
    Failed,
    Registered,
}

impl EventAction {
    /// The action that announces a job entering `status`.
    pub fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => EventAction::Created,
            JobStatus::Running => EventAction::Started,
            JobStatus::Completed => EventAction::Completed,
            JobStatus::Failed => EventAction::Failed,
        }
    }
}

/// Event forwarded to subscribers. Delivery is best effort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Notification {
    Job {
        job_id: String,
        data_file_id: String,
        status: JobStatus,
        action: EventAction,
        timestamp: DateTime<Utc>,
    },
    DataFile {
        data_file_id: String,
        filename: String,
        action: EventAction,
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    pub fn job(job: &ProcessingJob) -> Self {
        Notification::Job {
            job_id: job.id.clone(),
            data_file_id: job.data_file_id.clone(),
            status: job.status,
            action: EventAction::for_status(job.status),
            timestamp: Utc::now(),
        }
    }

    /// Job event built from ids alone, for when the stored row is not at hand.
    pub fn job_status(job_id: &str, data_file_id: &str, status: JobStatus) -> Self {
        Notification::Job {
            job_id: job_id.to_string(),
            data_file_id: data_file_id.to_string(),
            status,
            action: EventAction::for_status(status),
            timestamp: Utc::now(),
        }
    }

    pub fn data_file(record: &DataFileRecord) -> Self {
        Notification::DataFile {
            data_file_id: record.id.clone(),
            filename: record.filename.clone(),
            action: EventAction::Registered,
            timestamp: Utc::now(),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Publishes and swallows failures after logging them.
pub fn publish(sink: &dyn NotificationSink, notification: Notification) {
    if let Err(e) = sink.publish(&notification) {
        log::warn!("Dropped notification {:?}: {}", notification, e);
    }
}

/// Fans notifications out over a tokio broadcast channel.
///
/// Having no subscribers is not an error; slow subscribers lag and lose the
/// oldest events.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: Arc<broadcast::Sender<Notification>>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for BroadcastSink {
    fn publish(&self, notification: &Notification) -> Result<(), NotificationError> {
        if self.sender.send(notification.clone()).is_err() {
            log::trace!("No subscribers for {:?}", notification);
        }
        Ok(())
    }
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, notification: &Notification) -> Result<(), NotificationError> {
        match notification {
            Notification::Job {
                job_id,
                status,
                action,
                ..
            } => log::info!("job {} {:?} ({})", job_id, action, status),
            Notification::DataFile {
                data_file_id,
                filename,
                ..
            } => log::info!("data file {} registered: {}", data_file_id, filename),
        }
        Ok(())
    }
}
