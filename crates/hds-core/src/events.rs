//! Collector notifications.
//!
//! Subscribers receive every event published after they subscribed, in
//! publish order. Publishing never blocks; receivers that have been dropped
//! are pruned on the next publish.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::apps::RegisteredApplication;
use crate::fault::FaultSignature;

/// Something the collector did.
#[derive(Debug, Clone)]
pub enum CollectorEvent {
    /// A report was accepted. Carries the stored record after the update,
    /// so `(fault_id, occurrence_count)` is unique per report.
    FaultObserved(FaultSignature),
    ApplicationRegistered(RegisteredApplication),
    PackageSaved { fault_id: Uuid, package_file: String },
    PackagingFailed { fault_id: Uuid, reason: String },
}

/// Fan-out channel for [`CollectorEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<CollectorEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CollectorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: CollectorEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<CollectorEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
