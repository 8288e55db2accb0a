//! Error types for the collector pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::fault::Metric;

/// A single metric read failed. The sampler records zero for that round.
#[derive(Debug, Error)]
pub enum MetricError {
    /// No source for this metric on this machine.
    #[error("{metric} telemetry unavailable")]
    Unavailable { metric: Metric },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Sampling was cut short by a shutdown signal.
#[derive(Debug, Error)]
#[error("sampling cancelled after {completed} of {requested} rounds")]
pub struct SampleCancelled {
    pub completed: usize,
    pub requested: usize,
}

/// FaultIndex read or write failure.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("fault index I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fault index {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Any failure while building a diagnostic package.
///
/// The fault record stays valid; its `package_file` is left untouched.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Cancelled(#[from] SampleCancelled),

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("packaging worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl PackageError {
    pub(crate) fn io(
        action: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
