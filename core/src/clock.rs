// Local wall clock
//
// Everything time-dependent in the engine reads milliseconds from a `Clock`
// so tests can drive time by hand.

use parking_lot::RwLock;
use std::sync::Arc;
use web_time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Milliseconds since the unix epoch
    fn now_ms(&self) -> u64;
}

/// The real clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<RwLock<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(RwLock::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        *self.now.write() += ms;
    }

    pub fn set(&self, ms: u64) {
        *self.now.write() = ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now.read()
    }
}
