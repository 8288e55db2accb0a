//! Integration tests for hds-core.
//!
//! These tests drive the full collector pipeline:
//! report → dedup → sampling → package assembly → index → registry update.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hds_core::{
    CaptureRequest, Collector, CollectorConfig, CollectorEvent, FaultIndex, FaultSignature,
    IncomingFault, Metric, MetricError, MetricsProvider, SamplerConfig, StructuredReport,
    TimeSeriesSampler,
};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Deterministic telemetry: CPU 42%, RAM 8 GB, counters growing by a fixed
/// step on every read.
struct FixedProvider {
    disk: AtomicU64,
    net: AtomicU64,
}

impl FixedProvider {
    fn new() -> Self {
        Self {
            disk: AtomicU64::new(0),
            net: AtomicU64::new(0),
        }
    }
}

impl MetricsProvider for FixedProvider {
    fn read(&self, metric: Metric) -> Result<f64, MetricError> {
        Ok(match metric {
            Metric::Cpu => 42.0,
            Metric::Ram => 8.0,
            Metric::Gpu => 0.0,
            Metric::Disk => self.disk.fetch_add(1024 * 1024, Ordering::SeqCst) as f64,
            Metric::Network => self.net.fetch_add(2048, Ordering::SeqCst) as f64,
        })
    }
}

fn fast_collector(dir: &Path) -> Collector {
    let config = CollectorConfig {
        sampler: SamplerConfig {
            sample_count: 3,
            interval: Duration::from_millis(2),
        },
        delete_backoff: Duration::from_millis(1),
        ..CollectorConfig::with_output_dir(dir)
    };
    Collector::new(config, Arc::new(FixedProvider::new()))
}

fn request(capture: &[&str], environment: &[&str]) -> CaptureRequest {
    CaptureRequest {
        log_file_location: "/var/log/app.log".to_string(),
        capture: capture.iter().map(|s| s.to_string()).collect(),
        environment: environment.iter().map(|s| s.to_string()).collect(),
    }
}

async fn wait_for_package(rx: &mut mpsc::UnboundedReceiver<CollectorEvent>) -> (Uuid, String) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("packaging timed out")
            .expect("event bus closed");
        match event {
            CollectorEvent::PackageSaved {
                fault_id,
                package_file,
            } => return (fault_id, package_file),
            CollectorEvent::PackagingFailed { reason, .. } => panic!("packaging failed: {reason}"),
            _ => {}
        }
    }
}

fn read_report(archive: &Path) -> StructuredReport {
    let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut json = String::new();
    zip.by_name("fault.json")
        .unwrap()
        .read_to_string(&mut json)
        .unwrap();
    serde_json::from_str(&json).unwrap()
}

#[tokio::test]
async fn repeated_fault_scenario() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = fast_collector(tmp.path());
    let mut rx = collector.events().subscribe();
    collector.start();

    let fault = FaultSignature::new("X", "F018", "F0")
        .with_severity("Critical")
        .with_description("null reference in render loop")
        .with_capture_request(request(&["PCAP"], &["CPU", "RAM"]));

    let first = collector.report(fault.clone());
    assert_eq!(first.occurrence_count, 1);
    assert!(first.package_file.is_empty());
    assert_eq!(first.type_description, "Software runtime exception");

    let (id, first_file) = wait_for_package(&mut rx).await;
    assert_eq!(id, first.fault_id);
    assert!(first_file.starts_with("pkg_X_F018_"), "{first_file}");
    assert!(first_file.ends_with(".zip"));
    assert!(collector.package_path(&first_file).is_some());

    let stored = collector.registry().get(first.fault_id).unwrap();
    assert_eq!(stored.package_file, first_file);
    assert_eq!(stored.time_series.series(Metric::Cpu).len(), 3);
    assert_eq!(stored.time_series.series(Metric::Ram).len(), 3);
    assert!(stored.time_series.series(Metric::Gpu).is_empty());

    let later = fault
        .clone()
        .with_timestamp(first.timestamp + chrono::Duration::seconds(5));
    let second = collector.report(later);
    assert_eq!(second.fault_id, first.fault_id);
    assert_eq!(second.occurrence_count, 2);
    assert!(second.last_timestamp > first.last_timestamp);
    // Previous package is retained until the new one lands.
    assert_eq!(second.package_file, first_file);

    let (id, second_file) = wait_for_package(&mut rx).await;
    assert_eq!(id, first.fault_id);
    assert_ne!(second_file, first_file);
    assert_eq!(
        collector.registry().get(id).unwrap().package_file,
        second_file
    );

    let index = collector.index().load().unwrap();
    assert_eq!(index.len(), 2);
    assert!(index.iter().all(|e| e.id == first.fault_id && e.app == "X"));

    let report = read_report(&tmp.path().join(&second_file));
    assert_eq!(report.fault.code, "F018");
    assert_eq!(report.fault.fault_type, "F0");
    assert_eq!(report.fault.severity, "Critical");
    assert_eq!(report.fault.count, 2);
    assert!(report.timeseries.cpu.iter().all(|s| s.value == 42.0));

    collector.shutdown();
}

#[tokio::test]
async fn distinct_keys_get_distinct_records() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = fast_collector(tmp.path());

    let a = collector.report(FaultSignature::new("X", "F018", "F0"));
    let b = collector.report(FaultSignature::new("X", "F018", "F1"));
    let c = collector.report(FaultSignature::new("Y", "F018", "F0"));
    let d = collector.report(FaultSignature::new("X", "F019", "F0"));
    let again = collector.report(FaultSignature::new("X", "F018", "f0"));

    let ids = [a.fault_id, b.fault_id, c.fault_id, d.fault_id];
    for (i, x) in ids.iter().enumerate() {
        for y in &ids[i + 1..] {
            assert_ne!(x, y);
        }
    }
    assert_eq!(again.fault_id, a.fault_id);
    assert_eq!(again.occurrence_count, 2);
    assert_eq!(collector.registry().len(), 4);
}

#[tokio::test]
async fn concurrent_reports_do_not_lose_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = Arc::new(fast_collector(tmp.path()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let collector = Arc::clone(&collector);
            tokio::task::spawn_blocking(move || {
                for _ in 0..25 {
                    collector.report(FaultSignature::new("Storm", "F100", "F3"));
                }
            })
        })
        .collect();
    for t in tasks {
        t.await.unwrap();
    }

    let all = collector.registry().list_all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].occurrence_count, 400);
    assert_eq!(all[0].type_description, "State machine logic error");
}

#[tokio::test]
async fn concurrent_packaging_keeps_every_index_entry() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = fast_collector(tmp.path());
    let mut rx = collector.events().subscribe();
    collector.start();

    for n in 0..8 {
        collector.report(
            FaultSignature::new(format!("App{n}"), "F001", "F0")
                .with_capture_request(request(&["DLTLogs"], &["CPU"])),
        );
    }
    let mut files = Vec::new();
    for _ in 0..8 {
        files.push(wait_for_package(&mut rx).await.1);
    }
    files.sort();
    files.dedup();
    assert_eq!(files.len(), 8);

    let index = FaultIndex::in_dir(tmp.path()).load().unwrap();
    assert_eq!(index.len(), 8);
    collector.shutdown();
}

#[tokio::test]
async fn incoming_payload_defaults_timestamp() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = fast_collector(tmp.path());

    let incoming: IncomingFault = serde_json::from_str(
        r#"{
            "FaultId": "00000000-0000-0000-0000-000000000001",
            "ApplicationName": "Application B",
            "FaultCode": "F204",
            "Type": "F4",
            "Severity": "Warning",
            "Description": "config key missing",
            "Timestamp": "0001-01-01T00:00:00",
            "CaptureRequest": { "LogFileLocation": "", "Capture": [], "Environment": ["cpu"] }
        }"#,
    )
    .unwrap();
    let before = chrono::Utc::now();
    let stored = collector.report_incoming(incoming);

    assert!(stored.timestamp >= before);
    assert_ne!(
        stored.fault_id.to_string(),
        "00000000-0000-0000-0000-000000000001"
    );
    assert_eq!(stored.type_description, "Invalid or missing configuration");
}

#[tokio::test(start_paused = true)]
async fn default_sampler_takes_thirty_samples() {
    let sampler = TimeSeriesSampler::new(Arc::new(FixedProvider::new()), SamplerConfig::default());
    let (_tx, mut rx) = watch::channel(false);
    let started = tokio::time::Instant::now();

    let series = sampler
        .build(&request(&[], &["CPU", "RAM"]), &mut rx)
        .await
        .unwrap();

    assert_eq!(series.cpu.len(), 30);
    assert_eq!(series.ram.len(), 30);
    assert!(series.gpu.is_empty());
    assert!(series.disk.is_empty());
    assert!(series.network.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(29));
}
