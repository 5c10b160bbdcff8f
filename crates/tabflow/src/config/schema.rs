use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::ParameterBag;
use crate::processor::BUILTIN_PROCESSORS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub watch_directory: PathBuf,
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    /// SQLite database file. Jobs are kept in memory when unset.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_slow_job_warning_secs")]
    pub slow_job_warning_secs: u64,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub processors: ProcessorsConfig,
    #[serde(default)]
    pub auto_jobs: Vec<AutoJob>,
}

impl Config {
    /// A configuration with every default filled in.
    pub fn new(watch_directory: impl Into<PathBuf>, data_directory: impl Into<PathBuf>) -> Self {
        Self {
            version: "1.0".to_string(),
            watch_directory: watch_directory.into(),
            data_directory: data_directory.into(),
            database: None,
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            slow_job_warning_secs: default_slow_job_warning_secs(),
            watch: WatchConfig::default(),
            processors: ProcessorsConfig::default(),
            auto_jobs: Vec::new(),
        }
    }

    pub fn slow_job_warning(&self) -> Duration {
        Duration::from_secs(self.slow_job_warning_secs)
    }
}

fn default_data_directory() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("tabflow"))
        .unwrap_or_else(|| PathBuf::from("tabflow-data"))
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_slow_job_warning_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_quiet_interval_ms")]
    pub quiet_interval_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Use a polling backend instead of native notifications (NFS, Docker mounts).
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    ["csv", "xlsx", "xls", "txt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ignore_patterns() -> Vec<String> {
    [".*", "~*", "*.tmp"].iter().map(|s| s.to_string()).collect()
}

fn default_quiet_interval_ms() -> u64 {
    2000
}

fn default_max_wait_ms() -> u64 {
    30_000
}

fn default_restart_delay_ms() -> u64 {
    1000
}

fn default_health_check_interval_ms() -> u64 {
    5000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recursive: true,
            extensions: default_extensions(),
            ignore_patterns: default_ignore_patterns(),
            quiet_interval_ms: default_quiet_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            poll_interval_ms: None,
        }
    }
}

impl WatchConfig {
    pub fn quiet_interval(&self) -> Duration {
        Duration::from_millis(self.quiet_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorsConfig {
    #[serde(default = "default_enabled_processors")]
    pub enabled: Vec<String>,
    /// Extra job types mapped onto a built-in processor.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

fn default_enabled_processors() -> Vec<String> {
    BUILTIN_PROCESSORS.iter().map(|s| s.to_string()).collect()
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_processors(),
            aliases: BTreeMap::new(),
        }
    }
}

/// A job submitted for every file the watcher ingests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoJob {
    pub job_type: String,
    #[serde(default)]
    pub parameters: ParameterBag,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"version": "1.0", "watch_directory": "/in", "data_directory": "/data"}"#,
        )
        .unwrap();

        assert_eq!(config.watch_directory, PathBuf::from("/in"));
        assert!(config.database.is_none());
        assert!(config.worker_count >= 1);
        assert_eq!(config.slow_job_warning(), Duration::from_secs(60));
        assert_eq!(config.watch.quiet_interval(), Duration::from_secs(2));
        assert_eq!(config.watch.max_wait(), Duration::from_secs(30));
        assert_eq!(config.watch.extensions, vec!["csv", "xlsx", "xls", "txt"]);
        assert!(config.watch.recursive);
        assert!(config.watch.poll_interval().is_none());
        assert_eq!(config.processors.enabled.len(), BUILTIN_PROCESSORS.len());
        assert!(config.auto_jobs.is_empty());
    }

    #[test]
    fn test_auto_jobs_parse_parameters() {
        let config: Config = serde_json::from_str(
            r#"{
                "version": "1.0",
                "watch_directory": "/in",
                "auto_jobs": [{"job_type": "rolling_mean", "parameters": {"window_size": 3}}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.auto_jobs[0].job_type, "rolling_mean");
        assert_eq!(config.auto_jobs[0].parameters["window_size"], 3);
    }
}
