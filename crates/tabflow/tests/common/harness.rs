//! Isolated pipeline environment backed by temporary directories.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

use tabflow::config::Config;
use tabflow::Notification;

pub struct TestHarness {
    temp_dir: TempDir,
    pub watch_dir: PathBuf,
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let watch_dir = base.join("incoming");
        let data_dir = base.join("data");
        let upload_dir = base.join("uploads");
        for dir in [&watch_dir, &data_dir, &upload_dir] {
            std::fs::create_dir_all(dir).expect("Failed to create test directory");
        }

        Self {
            temp_dir,
            watch_dir,
            data_dir,
            upload_dir,
        }
    }

    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Config with short debounce timings and a polling backend.
    pub fn config(&self) -> Config {
        let mut config = Config::new(&self.watch_dir, &self.data_dir);
        config.worker_count = 2;
        config.queue_capacity = 16;
        config.watch.quiet_interval_ms = 200;
        config.watch.max_wait_ms = 3000;
        config.watch.restart_delay_ms = 100;
        config.watch.health_check_interval_ms = 100;
        config.watch.poll_interval_ms = Some(50);
        config
    }

    /// Writes a file into the watched directory.
    pub fn drop_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.watch_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write watched file");
        path
    }

    /// Writes a file outside the watched directory.
    pub fn upload_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.upload_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write upload file");
        path
    }
}

pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    check()
}

/// Collects everything currently buffered on a subscription.
pub fn drain(rx: &mut Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(n) => out.push(n),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
