//! Per-target suppression of direct connection attempts.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use meshcall_protocol::SystemId;
use tokio::time::Instant;
use tracing::debug;

/// Remembers which systems recently failed a direct connection attempt.
///
/// A mark holds a retry-after instant; until it passes, the router goes
/// straight to the gateway relay for that system.
#[derive(Debug)]
pub struct IndirectMarks {
    suppression: Duration,
    marks: Mutex<HashMap<SystemId, Instant>>,
}

impl IndirectMarks {
    pub fn new(suppression: Duration) -> Self {
        Self {
            suppression,
            marks: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SystemId, Instant>> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` while direct attempts to `system` should be skipped.
    ///
    /// An elapsed mark is forgotten on the way.
    pub fn is_suppressed(&self, system: SystemId, now: Instant) -> bool {
        let mut marks = self.lock();
        match marks.get(&system) {
            Some(&retry_after) if now < retry_after => true,
            Some(_) => {
                marks.remove(&system);
                false
            }
            None => false,
        }
    }

    /// (Re)sets the mark for `system`.
    pub fn mark(&self, system: SystemId, now: Instant) {
        debug!(%system, suppression_ms = self.suppression.as_millis() as u64, "direct attempts suppressed");
        self.lock().insert(system, now + self.suppression);
    }

    pub fn clear(&self, system: SystemId) {
        self.lock().remove(&system);
    }
}
