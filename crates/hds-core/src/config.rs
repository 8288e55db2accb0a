//! Collector configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::event_log::DEFAULT_EVENT_LOG_CAPACITY;
use crate::package::PackageSettings;
use crate::sampler::SamplerConfig;

/// Default number of concurrent packaging runs.
pub const DEFAULT_WORKERS: usize = 4;

/// Everything needed to build a [`Collector`](crate::Collector).
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Directory holding archives and `fault_index.json`.
    pub output_dir: PathBuf,
    pub sampler: SamplerConfig,
    /// Maximum packaging runs in flight. Further runs queue.
    pub workers: usize,
    pub delete_retries: u32,
    pub delete_backoff: Duration,
    pub event_log_capacity: usize,
    /// Shown in report headers and the service index.
    pub collector_name: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        let package = PackageSettings::default();
        Self {
            output_dir: package.output_dir,
            sampler: SamplerConfig::default(),
            workers: DEFAULT_WORKERS,
            delete_retries: package.delete_retries,
            delete_backoff: package.delete_backoff,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            collector_name: package.collector_name,
        }
    }
}

impl CollectorConfig {
    /// Default config writing to `output_dir`.
    pub fn with_output_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub(crate) fn package_settings(&self) -> PackageSettings {
        PackageSettings {
            output_dir: self.output_dir.clone(),
            collector_name: self.collector_name.clone(),
            delete_retries: self.delete_retries,
            delete_backoff: self.delete_backoff,
        }
    }
}
