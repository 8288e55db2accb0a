//! Deduplicating fault store.
//!
//! Exactly one record exists per `(application, code, type)` key. Repeat
//! reports bump `occurrence_count` and `last_timestamp` on the stored record;
//! everything else in the repeat payload is discarded.
//!
//! The whole map sits behind one mutex. Critical sections are a hash lookup
//! and a few field writes, so reports for different keys never wait on I/O,
//! and same-key read-modify-write cannot lose updates.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::{CollectorEvent, EventBus};
use crate::fault::{FaultKey, FaultSignature, FaultTimeSeries, canonical_type, describe_type};

#[derive(Default)]
struct Store {
    faults: HashMap<FaultKey, FaultSignature>,
    by_id: HashMap<Uuid, FaultKey>,
}

/// Canonical owner of fault records.
pub struct FaultRegistry {
    store: Mutex<Store>,
    bus: EventBus,
}

impl FaultRegistry {
    /// Create an empty registry that publishes to `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            bus,
        }
    }

    /// Record a report and return the stored record after the update.
    ///
    /// Fires exactly one [`CollectorEvent::FaultObserved`] per call.
    pub fn report(&self, mut incoming: FaultSignature) -> FaultSignature {
        incoming.fault_type = canonical_type(&incoming.fault_type);
        incoming.type_description = describe_type(&incoming.fault_type).to_string();
        let key = incoming.key();

        let mut store = self.lock();
        let stored = if let Some(existing) = store.faults.get_mut(&key) {
            existing.occurrence_count += 1;
            existing.last_timestamp = incoming.timestamp;
            debug!(
                "repeat fault {} {}/{} count={}",
                existing.fault_id,
                existing.application_name,
                existing.fault_code,
                existing.occurrence_count
            );
            existing.clone()
        } else {
            incoming.fault_id = Uuid::new_v4();
            incoming.occurrence_count = 1;
            incoming.last_timestamp = incoming.timestamp;
            incoming.time_series = FaultTimeSeries::default();
            incoming.package_file.clear();
            info!(
                "new fault {} {}/{} type={} ({})",
                incoming.fault_id,
                incoming.application_name,
                incoming.fault_code,
                incoming.fault_type,
                incoming.type_description
            );
            store.by_id.insert(incoming.fault_id, key.clone());
            store.faults.insert(key, incoming.clone());
            incoming
        };
        // Published under the lock so per-key events arrive in update order.
        self.bus.publish(CollectorEvent::FaultObserved(stored.clone()));
        stored
    }

    /// Subscribe to the bus together with a snapshot of records that have no
    /// package yet. Reports made before the call are in the snapshot and
    /// later ones arrive on the receiver.
    pub fn subscribe_unpackaged(
        &self,
    ) -> (Vec<FaultSignature>, mpsc::UnboundedReceiver<CollectorEvent>) {
        let store = self.lock();
        let rx = self.bus.subscribe();
        let mut pending: Vec<FaultSignature> = store
            .faults
            .values()
            .filter(|f| f.package_file.is_empty())
            .cloned()
            .collect();
        drop(store);
        pending.sort_by_key(|f| f.last_timestamp);
        (pending, rx)
    }

    /// Snapshot of every record, most recently observed first.
    pub fn list_all(&self) -> Vec<FaultSignature> {
        let mut all: Vec<FaultSignature> = self.lock().faults.values().cloned().collect();
        sort_recent_first(&mut all);
        all
    }

    /// Records for one application (case-insensitive), most recent first.
    pub fn list_for_application(&self, application: &str) -> Vec<FaultSignature> {
        let mut matching: Vec<FaultSignature> = self
            .lock()
            .faults
            .values()
            .filter(|f| f.application_name.eq_ignore_ascii_case(application))
            .cloned()
            .collect();
        sort_recent_first(&mut matching);
        matching
    }

    pub fn get(&self, fault_id: Uuid) -> Option<FaultSignature> {
        let store = self.lock();
        let key = store.by_id.get(&fault_id)?;
        store.faults.get(key).cloned()
    }

    /// Store a completed time series on a record. Returns false if the
    /// record no longer exists (e.g. after [`clear`](Self::clear)).
    pub fn attach_time_series(&self, fault_id: Uuid, time_series: FaultTimeSeries) -> bool {
        self.update(fault_id, |f| f.time_series = time_series)
    }

    /// Link a packaged archive to a record.
    pub fn attach_package(&self, fault_id: Uuid, package_file: impl Into<String>) -> bool {
        let package_file = package_file.into();
        self.update(fault_id, |f| f.package_file = package_file)
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut store = self.lock();
        let n = store.faults.len();
        store.faults.clear();
        store.by_id.clear();
        info!("fault registry cleared ({n} records)");
    }

    pub fn len(&self) -> usize {
        self.lock().faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, fault_id: Uuid, apply: impl FnOnce(&mut FaultSignature)) -> bool {
        let mut store = self.lock();
        let Some(key) = store.by_id.get(&fault_id).cloned() else {
            debug!("fault {fault_id} no longer registered");
            return false;
        };
        match store.faults.get_mut(&key) {
            Some(fault) => {
                apply(fault);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sort_recent_first(faults: &mut [FaultSignature]) {
    faults.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
}
