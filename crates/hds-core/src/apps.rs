//! Registered reporting applications.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{CollectorEvent, EventBus};

/// One registration. Repeated registrations of the same name are kept as
/// separate entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredApplication {
    pub registration_id: String,
    pub application: String,
    pub version: String,
    pub registered: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Append-only list of registrations, in registration order.
pub struct ApplicationRegistry {
    apps: Mutex<Vec<RegisteredApplication>>,
    bus: EventBus,
}

impl ApplicationRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            apps: Mutex::new(Vec::new()),
            bus,
        }
    }

    /// Register an application. A blank `registration_id` gets a fresh UUID.
    pub fn register(
        &self,
        application: &str,
        version: &str,
        registration_id: Option<&str>,
    ) -> RegisteredApplication {
        let now = Utc::now();
        let registration_id = registration_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let app = RegisteredApplication {
            registration_id,
            application: application.trim().to_string(),
            version: version.trim().to_string(),
            registered: now,
            last_seen: now,
        };
        info!(
            "application registered: {} {} ({})",
            app.application, app.version, app.registration_id
        );
        self.lock().push(app.clone());
        self.bus
            .publish(CollectorEvent::ApplicationRegistered(app.clone()));
        app
    }

    /// Refresh `last_seen` on every registration of `application`
    /// (case-insensitive). Returns whether any matched.
    pub fn touch(&self, application: &str) -> bool {
        let now = Utc::now();
        let mut touched = false;
        for app in self
            .lock()
            .iter_mut()
            .filter(|a| a.application.eq_ignore_ascii_case(application))
        {
            app.last_seen = now;
            touched = true;
        }
        touched
    }

    pub fn list_all(&self) -> Vec<RegisteredApplication> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RegisteredApplication>> {
        self.apps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
