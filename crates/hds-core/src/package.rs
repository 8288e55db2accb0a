//! Diagnostic package assembly.
//!
//! One packaging run:
//! 1. samples the fault's capture request into `fault.time_series`,
//! 2. claims a working directory `pkg_<app>_<code>_<yyyyMMdd_HHmmss>`,
//! 3. writes capture placeholders, `event_log.txt`, `diagnostic_report.txt`
//!    and `fault.json` into it,
//! 4. compresses it to `<working directory>.zip`,
//! 5. deletes the working directory (retried; a leaked directory does not
//!    invalidate the archive),
//! 6. appends an [`IndexEntry`] and sets `fault.package_file`.
//!
//! Any failure in steps 1-6 removes the archive and returns an error, so
//! callers never see a partial package.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PackageError;
use crate::event_log::EventLog;
use crate::fault::{CaptureRequest, FaultSignature, FaultTimeSeries};
use crate::index::{FaultIndex, IndexEntry};
use crate::metrics::{LiveSnapshot, MetricsProvider, cumulative_baseline};
use crate::sampler::TimeSeriesSampler;

pub const EVENT_LOG_FILE: &str = "event_log.txt";
pub const TEXT_REPORT_FILE: &str = "diagnostic_report.txt";
pub const JSON_REPORT_FILE: &str = "fault.json";
/// Written to `event_log.txt` when the event log is empty.
pub const EMPTY_EVENT_LOG: &str = "[No events available]";

const MAX_NAME_ATTEMPTS: usize = 1000;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Knobs for package assembly.
#[derive(Debug, Clone)]
pub struct PackageSettings {
    /// Directory holding archives and the index.
    pub output_dir: PathBuf,
    /// Name of this collector, written into report headers.
    pub collector_name: String,
    /// Attempts to remove the working directory.
    pub delete_retries: u32,
    /// Pause between removal attempts.
    pub delete_backoff: Duration,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("DiagnosticsPackages"),
            collector_name: "HDS Collector".to_string(),
            delete_retries: 10,
            delete_backoff: Duration::from_millis(75),
        }
    }
}

// ---------------------------------------------------------------------------
// Structured report (fault.json)
// ---------------------------------------------------------------------------

/// Fault identity as embedded in `fault.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFault {
    pub id: Uuid,
    pub app: String,
    pub code: String,
    #[serde(rename = "type")]
    pub fault_type: String,
    pub type_description: String,
    pub severity: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    pub count: u32,
}

/// Machine-readable report written as `fault.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredReport {
    pub generated: String,
    pub collector: String,
    pub fault: ReportFault,
    pub capture_request: CaptureRequest,
    pub timeseries: FaultTimeSeries,
    pub snapshot: LiveSnapshot,
    pub event_log: Vec<String>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Removes a working directory: `(dir, retries, backoff) -> removed`.
type DirRemover = fn(&Path, u32, Duration) -> bool;

/// Produces diagnostic packages for faults.
pub struct PackageBuilder {
    settings: PackageSettings,
    sampler: TimeSeriesSampler,
    provider: Arc<dyn MetricsProvider>,
    index: Arc<FaultIndex>,
    event_log: Arc<EventLog>,
    remove_dir: DirRemover,
}

impl PackageBuilder {
    pub fn new(
        settings: PackageSettings,
        sampler: TimeSeriesSampler,
        provider: Arc<dyn MetricsProvider>,
        index: Arc<FaultIndex>,
        event_log: Arc<EventLog>,
    ) -> Self {
        Self {
            settings,
            sampler,
            provider,
            index,
            event_log,
            remove_dir: remove_dir_with_retries,
        }
    }

    #[cfg(test)]
    fn with_dir_remover(mut self, remove_dir: DirRemover) -> Self {
        self.remove_dir = remove_dir;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.settings.output_dir
    }

    /// Build, archive and index a package for `fault`.
    ///
    /// On success `fault.time_series` and `fault.package_file` are set and the
    /// archive file name is returned. Sampling suspends for the sampler's
    /// full window; the file work runs on the blocking pool.
    pub async fn generate(
        &self,
        fault: &mut FaultSignature,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<String, PackageError> {
        info!(
            "packaging fault {} {}/{} (count {})",
            fault.fault_id, fault.application_name, fault.fault_code, fault.occurrence_count
        );
        let baseline = cumulative_baseline(self.provider.as_ref());
        let started = tokio::time::Instant::now();
        fault.time_series = self.sampler.build(&fault.capture_request, shutdown).await?;
        let snapshot = LiveSnapshot::capture(
            self.provider.as_ref(),
            Some(baseline),
            started.elapsed().as_secs_f64(),
        );

        let job = PackageJob {
            settings: self.settings.clone(),
            index: Arc::clone(&self.index),
            fault: fault.clone(),
            snapshot,
            events: self.event_log.snapshot(),
            generated: Local::now(),
            remove_dir: self.remove_dir,
        };
        let file = tokio::task::spawn_blocking(move || job.run()).await??;
        fault.package_file.clone_from(&file);
        info!("package saved: {file}");
        Ok(file)
    }
}

/// Owned inputs for the blocking half of a packaging run.
struct PackageJob {
    settings: PackageSettings,
    index: Arc<FaultIndex>,
    fault: FaultSignature,
    snapshot: LiveSnapshot,
    events: Vec<String>,
    generated: DateTime<Local>,
    remove_dir: DirRemover,
}

impl PackageJob {
    fn run(self) -> Result<String, PackageError> {
        let out = &self.settings.output_dir;
        fs::create_dir_all(out).map_err(PackageError::io("create package directory", out))?;

        let base = package_base_name(
            &self.fault.application_name,
            &self.fault.fault_code,
            &self.generated,
        );
        let (work_dir, archive) = claim_work_dir(out, &base)?;
        debug!("working directory {}", work_dir.display());

        let written = self
            .write_artifacts(&work_dir)
            .and_then(|()| compress_dir(&work_dir, &archive));
        // A leaked working directory does not fail the package.
        (self.remove_dir)(
            &work_dir,
            self.settings.delete_retries,
            self.settings.delete_backoff,
        );
        if let Err(e) = written {
            discard(&archive);
            return Err(e);
        }

        let file = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = IndexEntry {
            id: self.fault.fault_id,
            file: file.clone(),
            fault: self.fault.fault_code.clone(),
            timestamp: self.fault.timestamp,
            app: self.fault.application_name.clone(),
        };
        if let Err(e) = self.index.append(entry) {
            discard(&archive);
            return Err(e.into());
        }
        Ok(file)
    }

    fn write_artifacts(&self, dir: &Path) -> Result<(), PackageError> {
        for (name, contents) in capture_artifacts(&self.fault.capture_request.capture) {
            write_file(&dir.join(name), contents.as_bytes())?;
        }

        let event_log = if self.events.is_empty() {
            EMPTY_EVENT_LOG.to_string()
        } else {
            let mut joined = self.events.join("\n");
            joined.push('\n');
            joined
        };
        write_file(&dir.join(EVENT_LOG_FILE), event_log.as_bytes())?;

        write_file(&dir.join(TEXT_REPORT_FILE), self.text_report().as_bytes())?;

        let json = serde_json::to_string_pretty(&self.structured_report())?;
        write_file(&dir.join(JSON_REPORT_FILE), json.as_bytes())?;
        Ok(())
    }

    fn text_report(&self) -> String {
        let f = &self.fault;
        let req = &f.capture_request;
        let mut lines = vec![
            "=== HDS DIAGNOSTIC REPORT ===".to_string(),
            format!(
                "Generated: {}",
                self.generated.to_rfc3339_opts(SecondsFormat::Millis, false)
            ),
            format!("Collector: {}", self.settings.collector_name),
            format!("App: {}", f.application_name),
            format!("Fault ID: {}", f.fault_id),
            format!("Fault: {}", f.fault_code),
            format!("Type: {} ({})", f.fault_type, f.type_description),
            format!("Severity: {}", f.severity),
            format!("Description: {}", f.description),
            format!("Timestamp: {}", rfc3339(&f.timestamp)),
            format!("Last Seen: {}", rfc3339(&f.last_timestamp)),
            format!("Occurrences: {}", f.occurrence_count),
            String::new(),
            "=== CAPTURE REQUEST ===".to_string(),
            format!("LogFileLocation: {}", req.log_file_location),
            "Capture:".to_string(),
        ];
        lines.extend(req.capture.iter().map(|c| format!(" - {c}")));
        lines.push("Environment:".to_string());
        lines.extend(req.environment.iter().map(|e| format!(" - {e}")));
        lines.push(String::new());
        lines.push("=== SNAPSHOT ===".to_string());
        lines.push(format!("CPU: {}", self.snapshot.cpu));
        lines.push(format!("RAM: {}", self.snapshot.ram));
        lines.push(format!("GPU: {}", self.snapshot.gpu));
        lines.push(format!("Disk: {}", self.snapshot.disk));
        lines.push(format!("Net: {}", self.snapshot.network));
        lines.push(String::new());
        lines.join("\n")
    }

    fn structured_report(&self) -> StructuredReport {
        let f = &self.fault;
        StructuredReport {
            generated: self.generated.to_rfc3339_opts(SecondsFormat::Millis, false),
            collector: self.settings.collector_name.clone(),
            fault: ReportFault {
                id: f.fault_id,
                app: f.application_name.clone(),
                code: f.fault_code.clone(),
                fault_type: f.fault_type.clone(),
                type_description: f.type_description.clone(),
                severity: f.severity.clone(),
                description: f.description.clone(),
                timestamp: f.timestamp,
                last_timestamp: f.last_timestamp,
                count: f.occurrence_count,
            },
            capture_request: f.capture_request.clone(),
            timeseries: f.time_series.clone(),
            snapshot: self.snapshot.clone(),
            event_log: self.events.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// `pkg_<app>_<code>_<yyyyMMdd_HHmmss>` with path-unsafe characters mapped to `_`.
pub fn package_base_name(application: &str, code: &str, at: &DateTime<Local>) -> String {
    format!(
        "pkg_{}_{}_{}",
        sanitize(application),
        sanitize(code),
        at.format("%Y%m%d_%H%M%S")
    )
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Create a fresh working directory whose archive name is also free.
/// Concurrent runs racing for the same second get `_2`, `_3`, ... suffixes.
fn claim_work_dir(out: &Path, base: &str) -> Result<(PathBuf, PathBuf), PackageError> {
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let name = if attempt == 1 {
            base.to_string()
        } else {
            format!("{base}_{attempt}")
        };
        let archive = out.join(format!("{name}.zip"));
        if archive.exists() {
            continue;
        }
        let dir = out.join(&name);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok((dir, archive)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(PackageError::io("create working directory", &dir)(e)),
        }
    }
    Err(PackageError::Io {
        action: "claim working directory",
        path: out.join(base),
        source: std::io::Error::from(std::io::ErrorKind::AlreadyExists),
    })
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Placeholder file name and contents for each requested capture kind.
/// Kinds are matched case-insensitively; duplicates collapse to one file.
pub fn capture_artifacts(kinds: &[String]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for kind in kinds {
        let kind = kind.trim();
        if kind.is_empty() {
            continue;
        }
        let (name, contents) = match kind.to_ascii_lowercase().as_str() {
            "pcap" => ("mock_capture.pcap".to_string(), "PCAP MOCK DATA".to_string()),
            "dltlogs" | "dlt" => (
                "mock_dlt.log".to_string(),
                "[DLT] Mock diagnostic log".to_string(),
            ),
            "memorydump" => (
                "mock_memory.dmp".to_string(),
                "MEMORY DUMP MOCK DATA".to_string(),
            ),
            "threaddump" => (
                "mock_threads.txt".to_string(),
                "THREAD DUMP MOCK DATA".to_string(),
            ),
            other => (
                format!("mock_{}.bin", sanitize(other)),
                format!("{kind} MOCK DATA"),
            ),
        };
        if seen.insert(name.clone()) {
            out.push((name, contents));
        }
    }
    out
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), PackageError> {
    fs::write(path, contents).map_err(PackageError::io("write", path))
}

fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Archive + cleanup
// ---------------------------------------------------------------------------

/// Deflate every regular file in `dir` (non-recursive, sorted by name) into
/// a new archive at `archive`.
fn compress_dir(dir: &Path, archive: &Path) -> Result<(), PackageError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(PackageError::io("list", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let out = File::create_new(archive).map_err(PackageError::io("create archive", archive))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        zip.start_file(name, options)?;
        let mut src = File::open(path).map_err(PackageError::io("open", path))?;
        std::io::copy(&mut src, &mut zip).map_err(PackageError::io("compress", path))?;
    }

    let mut writer = zip.finish()?;
    writer.flush().map_err(PackageError::io("flush archive", archive))?;
    Ok(())
}

/// Remove `dir`, retrying while the OS still holds handles. Returns whether
/// the directory is gone.
pub fn remove_dir_with_retries(dir: &Path, retries: u32, backoff: Duration) -> bool {
    let attempts = retries.max(1);
    for attempt in 1..=attempts {
        match fs::remove_dir_all(dir) {
            Ok(()) => return true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(e) => {
                debug!(
                    "remove {} attempt {attempt}/{attempts} failed: {e}",
                    dir.display()
                );
                if attempt < attempts {
                    std::thread::sleep(backoff);
                }
            }
        }
    }
    warn!("leaked working directory {}", dir.display());
    false
}

fn discard(archive: &Path) {
    if let Err(e) = fs::remove_file(archive)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("could not remove partial archive {}: {e}", archive.display());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
