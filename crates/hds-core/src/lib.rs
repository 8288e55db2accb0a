//! # hds-core
//!
//! Health diagnostics collector: client applications report runtime faults,
//! the collector deduplicates them, samples live telemetry for a bounded
//! window, and bundles the result into an indexed zip archive.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use hds_core::{Collector, CollectorConfig, FaultSignature, ProcMetrics};
//!
//! # #[tokio::main] async fn main() {
//! let collector = Collector::new(CollectorConfig::default(), Arc::new(ProcMetrics::new()));
//! collector.start();
//!
//! let stored = collector.report(FaultSignature::new("App", "F018", "F0"));
//! assert_eq!(stored.occurrence_count, 1);
//! # }
//! ```
//!
//! ## Architecture
//!
//! report → FaultRegistry (dedup) → EventBus → packaging worker →
//! TimeSeriesSampler → PackageBuilder → FaultIndex → registry
//!
//! Packaging is asynchronous and bounded by a worker semaphore; a report
//! returns as soon as the registry has been updated.

pub mod apps;
pub mod collector;
pub mod config;
pub mod error;
pub mod event_log;
pub mod events;
pub mod fault;
pub mod index;
pub mod metrics;
pub mod package;
pub mod registry;
pub mod sampler;

pub use apps::{ApplicationRegistry, RegisteredApplication};
pub use collector::Collector;
pub use config::{CollectorConfig, DEFAULT_WORKERS};
pub use error::{IndexError, MetricError, PackageError, SampleCancelled};
pub use event_log::{DEFAULT_EVENT_LOG_CAPACITY, EventLog};
pub use events::{CollectorEvent, EventBus};
pub use fault::{
    CaptureRequest, FAULT_TYPES, FaultKey, FaultSignature, FaultTimeSeries, IncomingFault, Metric,
    TimedValue, UNKNOWN_TYPE, canonical_type, describe_type, parse_timestamp,
};
pub use index::{FaultIndex, INDEX_FILE_NAME, IndexEntry};
pub use metrics::{GPU_PLACEHOLDER, LiveSnapshot, MetricsProvider, ProcMetrics};
pub use package::{PackageBuilder, PackageSettings, StructuredReport};
pub use registry::FaultRegistry;
pub use sampler::{DEFAULT_SAMPLE_COUNT, DEFAULT_SAMPLE_INTERVAL, SamplerConfig, TimeSeriesSampler};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
