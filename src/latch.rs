//! Keyed single-flight latch.
//!
//! [`SingleFlight::try_acquire`] checks and sets the latch for a key in one
//! step; the returned [`LatchGuard`] releases it when dropped, whichever way
//! the guarded attempt ends.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct SingleFlight {
    active: Arc<Mutex<HashSet<String>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `key`, or return `None` if an attempt for it is in flight.
    pub fn try_acquire(&self, key: &str) -> Option<LatchGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.to_string()) {
            debug!(key, "single-flight latch already held");
            return None;
        }
        Some(LatchGuard {
            active: Arc::clone(&self.active),
            key: key.to_string(),
        })
    }

    pub fn is_latched(&self, key: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Ownership of one latched key.
#[derive(Debug)]
#[must_use = "dropping the guard releases the latch immediately"]
pub struct LatchGuard {
    active: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
