use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, info_span, warn};

use super::filter::FileFilter;
use super::scanner::DirectoryScanner;
use super::stability::StabilityTracker;
use crate::config::WatchConfig;
use crate::error::WatchError;

const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathEvent {
    Touched(PathBuf),
    Removed(PathBuf),
}

type Backend = Box<dyn Watcher + Send>;

/// Watches a directory and reports each file once it has stopped changing.
///
/// Four pieces cooperate:
/// - the notify backend turns OS events into [`PathEvent`]s,
/// - one stability thread owns every pending deadline and hands settled
///   paths on,
/// - one ingest thread calls the ready handler, so a slow handler never
///   delays another path's deadline,
/// - a supervisor thread restarts the backend when it fails or the directory
///   disappears, re-running the startup sweep each time.
///
/// Pending deadlines live in the stability thread, so they survive restarts.
pub struct FileWatcher {
    root: PathBuf,
    shutdown: Arc<AtomicBool>,
    restarts: Arc<AtomicUsize>,
    #[cfg(test)]
    backend_failed: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn start<F>(root: &Path, config: &WatchConfig, on_ready: F) -> Result<Self, WatchError>
    where
        F: Fn(PathBuf) + Send + 'static,
    {
        let filter = FileFilter::from_config(config).map_err(|e| WatchError::Start {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let restarts = Arc::new(AtomicUsize::new(0));
        let backend_failed = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = unbounded();
        let (ready_tx, ready_rx) = unbounded();

        let supervisor = Supervisor {
            root: root.to_path_buf(),
            recursive: config.recursive,
            poll_interval: config.poll_interval(),
            restart_delay: config.restart_delay(),
            health_check_interval: config.health_check_interval(),
            filter,
            events: events_tx,
            backend_failed: Arc::clone(&backend_failed),
            shutdown: Arc::clone(&shutdown),
            restarts: Arc::clone(&restarts),
        };
        let backend = supervisor.establish()?;

        let ingest_shutdown = Arc::clone(&shutdown);
        let ingest = std::thread::Builder::new()
            .name("tabflow-ingest".to_string())
            .spawn(move || run_ready(ready_rx, on_ready, ingest_shutdown))
            .map_err(|e| WatchError::SpawnFailed(e.to_string()))?;

        let tracker = StabilityTracker::new(config.quiet_interval(), config.max_wait());
        let stability_shutdown = Arc::clone(&shutdown);
        let stability = std::thread::Builder::new()
            .name("tabflow-stability".to_string())
            .spawn(move || run_stability(tracker, events_rx, ready_tx, stability_shutdown))
            .map_err(|e| {
                shutdown.store(true, Ordering::SeqCst);
                WatchError::SpawnFailed(e.to_string())
            })?;

        supervisor.sweep();

        let supervise = std::thread::Builder::new()
            .name("tabflow-watch-supervisor".to_string())
            .spawn(move || supervisor.run(backend))
            .map_err(|e| {
                shutdown.store(true, Ordering::SeqCst);
                WatchError::SpawnFailed(e.to_string())
            })?;

        info!(
            "Watching {} (recursive: {}, quiet: {:?}, max wait: {:?})",
            root.display(),
            config.recursive,
            config.quiet_interval(),
            config.max_wait()
        );

        Ok(Self {
            root: root.to_path_buf(),
            shutdown,
            restarts,
            #[cfg(test)]
            backend_failed,
            threads: vec![ingest, stability, supervise],
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// How many times the supervisor has torn down and rebuilt the watch.
    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Signals every thread to exit. Pending paths are dropped.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn join(mut self) {
        self.shutdown();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Watcher thread panicked");
            }
        }
        info!("Stopped watching {}", self.root.display());
    }
}

#[cfg(test)]
impl FileWatcher {
    /// Makes the supervisor treat the backend as failed on its next check.
    pub(crate) fn fail_backend(&self) {
        self.backend_failed.store(true, Ordering::SeqCst);
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_ready<F>(ready: Receiver<PathBuf>, on_ready: F, shutdown: Arc<AtomicBool>)
where
    F: Fn(PathBuf),
{
    while !shutdown.load(Ordering::SeqCst) {
        match ready.recv_timeout(TICK) {
            Ok(path) => on_ready(path),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Ingest thread exiting");
}

fn run_stability(
    mut tracker: StabilityTracker,
    events: Receiver<PathEvent>,
    ready: Sender<PathBuf>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        let wake = tracker
            .next_deadline()
            .map(|deadline| deadline.min(now + TICK))
            .unwrap_or(now + TICK);

        match events.recv_deadline(wake) {
            Ok(PathEvent::Touched(path)) => {
                if tracker.observe(path.clone(), Instant::now()) {
                    debug!("Tracking {}", path.display());
                }
            }
            Ok(PathEvent::Removed(path)) => {
                if tracker.cancel(&path) {
                    debug!("Stopped tracking removed file {}", path.display());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if tracker.is_empty() {
                    break;
                }
                std::thread::sleep(TICK);
            }
        }

        for path in tracker.due(Instant::now()) {
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {
                    if ready.send(path).is_err() {
                        debug!("Ingest thread gone; stability thread exiting");
                        return;
                    }
                }
                Ok(meta) if meta.is_file() => debug!("Skipping empty file {}", path.display()),
                Ok(_) => {}
                Err(_) => debug!("{} disappeared before it settled", path.display()),
            }
        }
    }
    debug!("Stability thread exiting");
}

struct Supervisor {
    root: PathBuf,
    recursive: bool,
    poll_interval: Option<Duration>,
    restart_delay: Duration,
    health_check_interval: Duration,
    filter: FileFilter,
    events: Sender<PathEvent>,
    backend_failed: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    restarts: Arc<AtomicUsize>,
}

impl Supervisor {
    fn run(self, backend: Backend) {
        let mut backend = Some(backend);

        loop {
            if backend.is_none() {
                match self.establish() {
                    Ok(b) => {
                        backend = Some(b);
                        info!("Watch on {} re-established", self.root.display());
                        self.sweep();
                    }
                    Err(e) => {
                        error!("{}", e);
                        if !self.pause(self.restart_delay) {
                            break;
                        }
                        continue;
                    }
                }
            }

            if !self.pause(self.health_check_interval) {
                break;
            }

            if let Some(problem) = self.health_problem() {
                warn!(
                    "Watch on {} failed ({}); restarting in {:?}",
                    self.root.display(),
                    problem,
                    self.restart_delay
                );
                backend = None;
                self.restarts.fetch_add(1, Ordering::SeqCst);
                if !self.pause(self.restart_delay) {
                    break;
                }
            }
        }

        drop(backend);
        debug!("Watch supervisor exiting");
    }

    /// Sleeps in short steps. Returns `false` once shutdown was requested.
    fn pause(&self, total: Duration) -> bool {
        let until = Instant::now() + total;
        while Instant::now() < until {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            std::thread::sleep(TICK.min(until.saturating_duration_since(Instant::now())));
        }
        !self.shutdown.load(Ordering::SeqCst)
    }

    fn health_problem(&self) -> Option<&'static str> {
        if !self.root.is_dir() {
            Some("directory is gone")
        } else if self.backend_failed.load(Ordering::SeqCst) {
            Some("backend reported an error")
        } else {
            None
        }
    }

    fn establish(&self) -> Result<Backend, WatchError> {
        if !self.root.is_dir() {
            std::fs::create_dir_all(&self.root).map_err(|e| self.start_error(e))?;
            info!("Created watch directory {}", self.root.display());
        }
        self.backend_failed.store(false, Ordering::SeqCst);

        let mut backend: Backend = match self.poll_interval {
            Some(interval) => Box::new(
                PollWatcher::new(
                    self.handler(),
                    NotifyConfig::default().with_poll_interval(interval),
                )
                .map_err(|e| self.start_error(e))?,
            ),
            None => Box::new(
                notify::recommended_watcher(self.handler()).map_err(|e| self.start_error(e))?,
            ),
        };

        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        backend
            .watch(&self.root, mode)
            .map_err(|e| self.start_error(e))?;
        Ok(backend)
    }

    fn start_error(&self, e: impl std::fmt::Display) -> WatchError {
        WatchError::Start {
            path: self.root.clone(),
            reason: e.to_string(),
        }
    }

    fn handler(&self) -> impl FnMut(notify::Result<Event>) + Send + 'static {
        let events = self.events.clone();
        let filter = self.filter.clone();
        let failed = Arc::clone(&self.backend_failed);
        let root = self.root.clone();

        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path_event in translate(&event, &root) {
                    if let PathEvent::Removed(path) = &path_event {
                        if *path == root {
                            failed.store(true, Ordering::SeqCst);
                            continue;
                        }
                    }
                    let path = match &path_event {
                        PathEvent::Touched(p) | PathEvent::Removed(p) => p,
                    };
                    if filter.accepts(path) {
                        let _ = events.send(path_event);
                    }
                }
            }
            Err(e) => {
                warn!("Watch backend error: {}", e);
                failed.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Schedules every existing file through the normal stabilization path.
    fn sweep(&self) {
        let _span = info_span!("startup_sweep", root = %self.root.display()).entered();
        let scanner = DirectoryScanner::new(&self.root, self.recursive, self.filter.clone());
        match scanner.scan() {
            Ok(paths) => {
                for path in paths {
                    let _ = self.events.send(PathEvent::Touched(path));
                }
            }
            Err(e) => warn!("Startup sweep failed: {}", e),
        }
    }
}

fn translate(event: &Event, root: &Path) -> Vec<PathEvent> {
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(PathEvent::Touched).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(PathEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().cloned().map(PathEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push(PathEvent::Removed(from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                out.push(PathEvent::Touched(to.clone()));
            }
            out
        }
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => Vec::new(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() || p.as_path() == root {
                    PathEvent::Touched(p.clone())
                } else {
                    PathEvent::Removed(p.clone())
                }
            })
            .collect(),
    }
}
