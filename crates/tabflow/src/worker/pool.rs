use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::executor::Executor;
use crate::worker::queue::Dispatch;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed set of worker threads pulling from one queue.
///
/// Workers exit when the queue disconnects (after draining it) or, sooner,
/// when [`WorkerPool::stop`] is called.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn start(
        receiver: Receiver<Dispatch>,
        worker_count: usize,
        executor: Arc<Executor>,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::NoWorkers);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let worker_id = format!("tabflow-worker-{}", index);
            let rx = receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let executor = Arc::clone(&executor);

            let handle = thread::Builder::new()
                .name(worker_id.clone())
                .spawn(move || run_worker(worker_id, rx, shutdown_flag, executor))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self { workers, shutdown })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Asks workers to exit after their current job without draining the queue.
    pub fn stop(&self) {
        info!("Stopping worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Waits for every worker to exit.
    pub fn join(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

fn run_worker(
    worker_id: String,
    receiver: Receiver<Dispatch>,
    shutdown: Arc<AtomicBool>,
    executor: Arc<Executor>,
) {
    debug!("{} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("{} received shutdown signal", worker_id);
            break;
        }

        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(dispatch) => {
                executor.execute(&worker_id, &dispatch);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("{} queue disconnected", worker_id);
                break;
            }
        }
    }

    debug!("{} stopped", worker_id);
}
