//! Fault data model: signatures, capture requests, fault type table and
//! per-metric time series.
//!
//! Inbound reports use PascalCase field names (`ApplicationName`, `FaultCode`,
//! `CaptureRequest`, ...) with camelCase and snake_case aliases. The stored
//! [`FaultSignature`] is serialized camelCase for API consumers.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Fault type table
// ---------------------------------------------------------------------------

/// Fixed fault category table: code and human-readable meaning.
pub const FAULT_TYPES: [(&str, &str); 15] = [
    ("F0", "Software runtime exception"),
    ("F1", "Stack/memory boundary violation"),
    ("F2", "Task execution timeout"),
    ("F3", "State machine logic error"),
    ("F4", "Invalid or missing configuration"),
    ("F5", "Flashing or update error"),
    ("F6", "Memory or CPU resource exhaustion"),
    ("F7", "IPC or messaging error"),
    ("F8", "Real-time scheduling violation"),
    ("F9", "Memory access violation"),
    ("FA", "Integrity check failure"),
    ("FB", "Unhandled exception or fault"),
    ("FC", "Startup sequence error"),
    ("FD", "Service not responding"),
    ("FE", "Internal software supervision failure"),
];

/// Description used for codes outside [`FAULT_TYPES`].
pub const UNKNOWN_TYPE: &str = "Unknown type";

/// Canonical form of a type code: trimmed and upper-cased.
pub fn canonical_type(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Look up the meaning of a fault type code (case-insensitive).
pub fn describe_type(code: &str) -> &'static str {
    let code = code.trim();
    FAULT_TYPES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map_or(UNKNOWN_TYPE, |(_, desc)| desc)
}

// ---------------------------------------------------------------------------
// Metrics vocabulary
// ---------------------------------------------------------------------------

/// Live metric that a capture request may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Cpu,
    Ram,
    Gpu,
    Disk,
    Network,
}

impl Metric {
    /// Every metric, in report order.
    pub const ALL: [Metric; 5] = [
        Metric::Cpu,
        Metric::Ram,
        Metric::Gpu,
        Metric::Disk,
        Metric::Network,
    ];

    /// Wire name used in `CaptureRequest.Environment`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Ram => "RAM",
            Self::Gpu => "GPU",
            Self::Disk => "DISK",
            Self::Network => "NETWORK",
        }
    }

    /// Case-insensitive parse of a wire name.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(raw))
    }

    /// Disk and network readings are cumulative counters; the sampler turns
    /// them into rates.
    pub fn is_cumulative(self) -> bool {
        matches!(self, Self::Disk | Self::Network)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Capture request
// ---------------------------------------------------------------------------

/// What to gather for a fault: artifact kinds and live metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CaptureRequest {
    /// Collector-observed log path. Recorded, never validated.
    #[serde(alias = "logFileLocation", alias = "log_file_location")]
    pub log_file_location: String,
    /// Artifact kinds, e.g. `DLTLogs`, `PCAP`, `ThreadDump`.
    #[serde(alias = "capture")]
    pub capture: Vec<String>,
    /// Metric names, e.g. `CPU`, `RAM`.
    #[serde(alias = "environment")]
    pub environment: Vec<String>,
}

impl CaptureRequest {
    /// Whether `metric` appears in `environment` (case-insensitive).
    pub fn wants(&self, metric: Metric) -> bool {
        self.environment
            .iter()
            .any(|e| e.trim().eq_ignore_ascii_case(metric.name()))
    }

    /// Requested metrics in [`Metric::ALL`] order. Unknown names are skipped.
    pub fn requested_metrics(&self) -> Vec<Metric> {
        Metric::ALL
            .into_iter()
            .filter(|m| self.wants(*m))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Time series
// ---------------------------------------------------------------------------

/// One timestamped sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimedValue {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// One ordered sequence per metric. Unrequested metrics stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FaultTimeSeries {
    /// CPU utilisation, percent.
    pub cpu: Vec<TimedValue>,
    /// Used memory, GB.
    pub ram: Vec<TimedValue>,
    /// GPU utilisation, percent.
    pub gpu: Vec<TimedValue>,
    /// Disk throughput, MB/s.
    pub disk: Vec<TimedValue>,
    /// Network throughput, KB/s.
    pub network: Vec<TimedValue>,
}

impl FaultTimeSeries {
    pub fn series(&self, metric: Metric) -> &[TimedValue] {
        match metric {
            Metric::Cpu => &self.cpu,
            Metric::Ram => &self.ram,
            Metric::Gpu => &self.gpu,
            Metric::Disk => &self.disk,
            Metric::Network => &self.network,
        }
    }

    pub fn series_mut(&mut self, metric: Metric) -> &mut Vec<TimedValue> {
        match metric {
            Metric::Cpu => &mut self.cpu,
            Metric::Ram => &mut self.ram,
            Metric::Gpu => &mut self.gpu,
            Metric::Disk => &mut self.disk,
            Metric::Network => &mut self.network,
        }
    }

    pub fn is_empty(&self) -> bool {
        Metric::ALL.iter().all(|m| self.series(*m).is_empty())
    }
}

// ---------------------------------------------------------------------------
// Fault signature
// ---------------------------------------------------------------------------

/// Identity of a fault: application, code and canonical type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FaultKey {
    pub application: String,
    pub code: String,
    pub fault_type: String,
}

/// A reported fault as held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultSignature {
    /// Assigned by the registry on first insertion, never reassigned.
    pub fault_id: Uuid,
    pub application_name: String,
    pub fault_code: String,
    #[serde(rename = "type")]
    pub fault_type: String,
    pub type_description: String,
    /// Warning, Error or Critical. Free text on the wire.
    pub severity: String,
    pub description: String,
    /// Event time of the first report.
    pub timestamp: DateTime<Utc>,
    /// Event time of the latest report.
    pub last_timestamp: DateTime<Utc>,
    pub occurrence_count: u32,
    pub capture_request: CaptureRequest,
    pub time_series: FaultTimeSeries,
    /// Archive file name; empty until a packaging run succeeds.
    pub package_file: String,
}

impl FaultSignature {
    /// Unregistered signature stamped with the current time.
    pub fn new(
        application_name: impl Into<String>,
        fault_code: impl Into<String>,
        fault_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            fault_id: Uuid::nil(),
            application_name: application_name.into(),
            fault_code: fault_code.into(),
            fault_type: fault_type.into(),
            type_description: String::new(),
            severity: String::new(),
            description: String::new(),
            timestamp: now,
            last_timestamp: now,
            occurrence_count: 0,
            capture_request: CaptureRequest::default(),
            time_series: FaultTimeSeries::default(),
            package_file: String::new(),
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self.last_timestamp = timestamp;
        self
    }

    pub fn with_capture_request(mut self, request: CaptureRequest) -> Self {
        self.capture_request = request;
        self
    }

    /// Dedup key. The type component is canonicalised so `f0` and `F0`
    /// resolve to the same record.
    pub fn key(&self) -> FaultKey {
        FaultKey {
            application: self.application_name.clone(),
            code: self.fault_code.clone(),
            fault_type: canonical_type(&self.fault_type),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound report
// ---------------------------------------------------------------------------

/// Body of `POST /faults/report`.
///
/// Any `FaultId` in the payload is ignored: identity is always assigned by
/// the registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IncomingFault {
    #[serde(alias = "applicationName", alias = "application_name")]
    pub application_name: String,
    #[serde(alias = "faultCode", alias = "fault_code")]
    pub fault_code: String,
    #[serde(rename = "Type", alias = "type")]
    pub fault_type: String,
    #[serde(alias = "severity")]
    pub severity: String,
    #[serde(alias = "description")]
    pub description: String,
    #[serde(alias = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(alias = "captureRequest", alias = "capture_request")]
    pub capture_request: CaptureRequest,
}

impl IncomingFault {
    /// Convert to a signature. A missing or zero timestamp becomes `received_at`.
    pub fn into_signature(self, received_at: DateTime<Utc>) -> FaultSignature {
        FaultSignature::new(self.application_name, self.fault_code, self.fault_type)
            .with_severity(self.severity)
            .with_description(self.description)
            .with_timestamp(self.timestamp.unwrap_or(received_at))
            .with_capture_request(self.capture_request)
    }
}

/// Parse an inbound timestamp.
///
/// Accepts RFC 3339 and offset-less `YYYY-MM-DDTHH:MM:SS[.fff]` (read as UTC).
/// Blank strings and year-1 placeholders yield `None`.
pub fn parse_timestamp(raw: &str) -> Result<Option<DateTime<Utc>>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
        })
        .map_err(|e| format!("invalid timestamp '{raw}': {e}"))?;
    if parsed.year() <= 1 {
        Ok(None)
    } else {
        Ok(Some(parsed))
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        UnixSeconds(i64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None | Some(Raw::UnixSeconds(0)) => Ok(None),
        Some(Raw::UnixSeconds(secs)) => DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {secs}"))),
        Some(Raw::Text(s)) => parse_timestamp(&s).map_err(de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
