//! The collector pipeline.
//!
//! [`Collector`] owns the fault and application registries, the event bus,
//! the event log and the package builder. [`Collector::start`] spawns a
//! dispatcher task that packages every record still lacking an archive, then
//! listens for `FaultObserved` events and runs one packaging job per event,
//! at most `workers` at a time. [`Collector::report`] never waits on
//! packaging. Until `start` is called nothing subscribes to the bus, so an
//! unstarted collector buffers no events.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use log::{debug, error, info};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use crate::apps::{ApplicationRegistry, RegisteredApplication};
use crate::config::CollectorConfig;
use crate::error::PackageError;
use crate::event_log::EventLog;
use crate::events::{CollectorEvent, EventBus};
use crate::fault::{FaultSignature, IncomingFault};
use crate::index::FaultIndex;
use crate::metrics::MetricsProvider;
use crate::package::PackageBuilder;
use crate::registry::FaultRegistry;
use crate::sampler::{TimeSeriesSampler, wait_for_shutdown};

pub struct Collector {
    config: CollectorConfig,
    registry: Arc<FaultRegistry>,
    apps: ApplicationRegistry,
    bus: EventBus,
    event_log: Arc<EventLog>,
    index: Arc<FaultIndex>,
    builder: Arc<PackageBuilder>,
    workers: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Collector {
    pub fn new(config: CollectorConfig, provider: Arc<dyn MetricsProvider>) -> Self {
        let bus = EventBus::new();
        let event_log = Arc::new(EventLog::new(config.event_log_capacity));
        let index = Arc::new(FaultIndex::in_dir(&config.output_dir));
        let sampler = TimeSeriesSampler::new(Arc::clone(&provider), config.sampler);
        let builder = Arc::new(PackageBuilder::new(
            config.package_settings(),
            sampler,
            provider,
            Arc::clone(&index),
            Arc::clone(&event_log),
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            registry: Arc::new(FaultRegistry::new(bus.clone())),
            apps: ApplicationRegistry::new(bus.clone()),
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
            bus,
            event_log,
            index,
            builder,
            shutdown,
            started: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        }
    }

    /// Spawn the packaging dispatcher. Must be called inside a tokio runtime.
    /// Returns false if already started.
    ///
    /// Records reported before this call are packaged once each, from their
    /// latest state.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let (backlog, mut events) = self.registry.subscribe_unpackaged();
        if !backlog.is_empty() {
            debug!("packaging {} faults reported before start", backlog.len());
        }

        let jobs = PackagingJobs {
            registry: Arc::clone(&self.registry),
            builder: Arc::clone(&self.builder),
            workers: Arc::clone(&self.workers),
            event_log: Arc::clone(&self.event_log),
            bus: self.bus.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        let mut stop = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            for fault in backlog {
                tokio::spawn(jobs.clone().run(fault));
            }
            loop {
                tokio::select! {
                    biased;
                    () = wait_for_shutdown(&mut stop) => break,
                    event = events.recv() => match event {
                        Some(CollectorEvent::FaultObserved(fault)) => {
                            tokio::spawn(jobs.clone().run(fault));
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            debug!("packaging dispatcher stopped");
        });
        *self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        self.event_log.record("Collector ready.");
        info!(
            "collector started: {} workers, {} samples every {:?}, packages in {}",
            self.config.workers.max(1),
            self.config.sampler.sample_count,
            self.config.sampler.interval,
            self.config.output_dir.display()
        );
        true
    }

    /// Accept a fault report. Returns the stored record; packaging runs later.
    pub fn report(&self, fault: FaultSignature) -> FaultSignature {
        if self.apps.touch(&fault.application_name) {
            debug!("refreshed application {}", fault.application_name);
        }
        self.event_log.record(format!(
            "Fault reported: {} {} ({})",
            fault.application_name, fault.fault_code, fault.fault_type
        ));
        match serde_json::to_string_pretty(&fault.capture_request) {
            Ok(json) => self.event_log.record(format!("Capture request: {json}")),
            Err(e) => debug!("capture request not serializable: {e}"),
        }
        self.registry.report(fault)
    }

    /// Convenience for transport layers: stamp and report an inbound payload.
    pub fn report_incoming(&self, incoming: IncomingFault) -> FaultSignature {
        self.report(incoming.into_signature(Utc::now()))
    }

    pub fn register_app(
        &self,
        application: &str,
        version: &str,
        registration_id: Option<&str>,
    ) -> RegisteredApplication {
        let app = self.apps.register(application, version, registration_id);
        self.event_log.record(format!(
            "Application registered: {} {}",
            app.application, app.version
        ));
        app
    }

    /// Reset the fault registry. Archives and the index are kept.
    pub fn clear(&self) {
        self.registry.clear();
        self.event_log.record("Faults cleared.");
    }

    /// Resolve an archive name inside the output directory. Only plain
    /// `.zip` names recorded in the fault index resolve, and only while the
    /// file exists.
    pub fn package_path(&self, file: &str) -> Option<PathBuf> {
        if file.is_empty()
            || file.starts_with('.')
            || file.contains(['/', '\\'])
            || file.contains("..")
            || !file.ends_with(".zip")
        {
            return None;
        }
        match self.index.load() {
            Ok(entries) if entries.iter().any(|e| e.file == file) => {}
            Ok(_) => return None,
            Err(e) => {
                debug!("fault index unreadable while resolving {file}: {e}");
                return None;
            }
        }
        let path = self.config.output_dir.join(file);
        path.is_file().then_some(path)
    }

    /// Cancel in-flight sampling and stop dispatching. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("collector shutting down");
        }
        // Running jobs observe the signal on their own; the dispatcher only
        // spawns, so it can go immediately.
        if let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    pub fn registry(&self) -> &FaultRegistry {
        &self.registry
    }

    pub fn apps(&self) -> &ApplicationRegistry {
        &self.apps
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn index(&self) -> &FaultIndex {
        &self.index
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Shared handles for packaging jobs spawned by the dispatcher.
#[derive(Clone)]
struct PackagingJobs {
    registry: Arc<FaultRegistry>,
    builder: Arc<PackageBuilder>,
    workers: Arc<Semaphore>,
    event_log: Arc<EventLog>,
    bus: EventBus,
    shutdown: watch::Receiver<bool>,
}

impl PackagingJobs {
    async fn run(mut self, mut fault: FaultSignature) {
        let Ok(_permit) = Arc::clone(&self.workers).acquire_owned().await else {
            return;
        };
        let fault_id = fault.fault_id;
        match self.builder.generate(&mut fault, &mut self.shutdown).await {
            Ok(file) => {
                self.registry
                    .attach_time_series(fault_id, fault.time_series);
                self.registry.attach_package(fault_id, file.clone());
                self.event_log.record(format!("Package saved: {file}"));
                self.bus.publish(CollectorEvent::PackageSaved {
                    fault_id,
                    package_file: file,
                });
            }
            Err(e) => {
                if !matches!(e, PackageError::Cancelled(_)) && !fault.time_series.is_empty() {
                    self.registry
                        .attach_time_series(fault_id, fault.time_series);
                }
                error!("packaging failed for fault {fault_id}: {e}");
                self.event_log.record(format!("GeneratePackage ERROR: {e}"));
                self.bus.publish(CollectorEvent::PackagingFailed {
                    fault_id,
                    reason: e.to_string(),
                });
            }
        }
    }
}
