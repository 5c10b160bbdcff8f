pub mod data_quality;
pub(crate) mod params;
pub mod peak_detection;
pub mod rolling_mean;
pub mod scale_column;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ProcessorsConfig;
use crate::error::{ConfigError, ProcessError};
use crate::model::ParameterBag;
use crate::table::Table;

pub use data_quality::DataQuality;
pub use peak_detection::PeakDetection;
pub use rolling_mean::RollingMean;
pub use scale_column::ScaleColumn;

/// Names of the processors compiled into the binary.
pub const BUILTIN_PROCESSORS: &[&str] = &[
    "rolling_mean",
    "peak_detection",
    "data_quality",
    "scale_column",
];

/// A pure transformation over one table.
///
/// Implementations must not touch the job store or any shared state: the same
/// table and parameters always produce the same result.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rejects structurally invalid parameters at submission time.
    fn validate(&self, _params: &ParameterBag) -> Result<(), ProcessError> {
        Ok(())
    }

    fn process(&self, table: Table, params: &ParameterBag) -> Result<Value, ProcessError>;
}

fn builtin(name: &str) -> Option<Arc<dyn Processor>> {
    let processor: Arc<dyn Processor> = match name {
        "rolling_mean" => Arc::new(RollingMean),
        "peak_detection" => Arc::new(PeakDetection),
        "data_quality" => Arc::new(DataQuality),
        "scale_column" => Arc::new(ScaleColumn),
        _ => return None,
    };
    Some(processor)
}

fn unknown(name: &str) -> ConfigError {
    ConfigError::UnknownProcessor {
        name: name.to_string(),
        available: BUILTIN_PROCESSORS.join(", "),
    }
}

/// Maps job types to processors. Read-only once built.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    /// An empty registry; add entries with [`ProcessorRegistry::with`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in processor under its own name.
    pub fn builtin() -> Self {
        BUILTIN_PROCESSORS
            .iter()
            .filter_map(|name| builtin(name).map(|p| (*name, p)))
            .fold(Self::new(), |registry, (name, p)| registry.with(name, p))
    }

    /// Built-ins filtered by `config.enabled`, plus the configured aliases.
    pub fn from_config(config: &ProcessorsConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        for name in &config.enabled {
            let processor = builtin(name).ok_or_else(|| unknown(name))?;
            registry = registry.with(name, processor);
        }

        for (alias, target) in &config.aliases {
            let processor = builtin(target).ok_or_else(|| unknown(target))?;
            registry = registry.with(alias, processor);
        }

        log::debug!("Registered job types: {:?}", registry.job_types());
        Ok(registry)
    }

    /// Registers `processor` under `job_type`, replacing any previous entry.
    pub fn with(mut self, job_type: &str, processor: Arc<dyn Processor>) -> Self {
        self.processors.insert(job_type.to_string(), processor);
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.processors.contains_key(job_type)
    }

    /// Registered job types in sorted order.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.processors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
