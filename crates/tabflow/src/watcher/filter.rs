use std::path::Path;

use crate::config::WatchConfig;
use crate::error::ConfigError;

/// Decides which paths the watcher cares about.
#[derive(Debug, Clone)]
pub struct FileFilter {
    extensions: Vec<String>,
    ignore: Vec<glob::Pattern>,
}

impl FileFilter {
    pub fn new(extensions: &[String], ignore_patterns: &[String]) -> Result<Self, ConfigError> {
        let extensions = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        let ignore = ignore_patterns
            .iter()
            .map(|pattern| {
                glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { extensions, ignore })
    }

    pub fn from_config(config: &WatchConfig) -> Result<Self, ConfigError> {
        Self::new(&config.extensions, &config.ignore_patterns)
    }

    /// Whether the final path component matches an ignore pattern.
    pub fn is_ignored(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.ignore.iter().any(|p| p.matches(name)))
            .unwrap_or(false)
    }

    pub fn has_supported_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    pub fn accepts(&self, path: &Path) -> bool {
        self.has_supported_extension(path) && !self.is_ignored(path)
    }
}
