//! Bounded in-memory log of collector activity.
//!
//! This is the operator-facing event log that diagnostic packages snapshot
//! into `event_log.txt`; it is separate from process logging.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Local;

/// Default number of retained lines.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

/// Ring of `"<local time>  <message>"` lines. Oldest lines fall off first.
pub struct EventLog {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Append a timestamped line.
    pub fn record(&self, message: impl AsRef<str>) {
        let line = format!(
            "{}  {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            message.as_ref()
        );
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Copy of the current lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}
