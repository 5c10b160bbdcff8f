use std::sync::RwLock;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::WorkerError;
use crate::model::ParameterBag;
use crate::storage::StorageHandle;

/// Everything a worker needs to run one job.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub job_id: String,
    pub data_file_id: String,
    pub job_type: String,
    pub parameters: ParameterBag,
    pub storage_handle: StorageHandle,
}

/// Queue between the scheduler and the workers.
pub trait JobQueue: Send + Sync {
    /// Hands a dispatch to the workers. Fails once the queue is closed.
    fn enqueue(&self, dispatch: Dispatch) -> Result<(), WorkerError>;

    /// Like [`JobQueue::enqueue`] but fails with `QueueFull` instead of waiting.
    fn try_enqueue(&self, dispatch: Dispatch) -> Result<(), WorkerError>;
}

/// Bounded crossbeam channel. Enqueueing blocks while the channel is full.
pub struct ChannelQueue {
    sender: RwLock<Option<Sender<Dispatch>>>,
    receiver: Receiver<Dispatch>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
        }
    }

    /// Receiving end for workers.
    pub fn receiver(&self) -> Receiver<Dispatch> {
        self.receiver.clone()
    }

    /// Stops accepting work. Dispatches already queued are still delivered;
    /// receivers see a disconnect once the channel drains.
    pub fn close(&self) {
        let mut sender = match self.sender.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if sender.take().is_some() {
            log::debug!("Job queue closed with {} pending", self.receiver.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().map(|s| s.is_none()).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl JobQueue for ChannelQueue {
    fn enqueue(&self, dispatch: Dispatch) -> Result<(), WorkerError> {
        // The read lock is held across the send so close() cannot race a send.
        let sender = self.sender.read().map_err(|_| WorkerError::QueueClosed)?;
        match sender.as_ref() {
            Some(tx) => tx.send(dispatch).map_err(|_| WorkerError::QueueClosed),
            None => Err(WorkerError::QueueClosed),
        }
    }

    fn try_enqueue(&self, dispatch: Dispatch) -> Result<(), WorkerError> {
        let sender = self.sender.read().map_err(|_| WorkerError::QueueClosed)?;
        match sender.as_ref() {
            Some(tx) => tx.try_send(dispatch).map_err(|e| match e {
                TrySendError::Full(_) => WorkerError::QueueFull,
                TrySendError::Disconnected(_) => WorkerError::QueueClosed,
            }),
            None => Err(WorkerError::QueueClosed),
        }
    }
}
