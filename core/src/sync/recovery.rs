// Recovery manager: debounced, time-limited snapshot requests

use tracing::{debug, info, warn};

pub struct RecoveryManager {
    debounce_ms: u64,
    timeout_ms: u64,
    in_progress: bool,
    started_at_ms: Option<u64>,
    last_request_ms: Option<u64>,
    consecutive_timeouts: u32,
}

impl RecoveryManager {
    pub fn new(debounce_ms: u64, timeout_ms: u64) -> Self {
        Self {
            debounce_ms,
            timeout_ms,
            in_progress: false,
            started_at_ms: None,
            last_request_ms: None,
            consecutive_timeouts: 0,
        }
    }

    /// Decide whether to ask for a snapshot now. Returns false when one is
    /// already on its way or the last request was too recent; on true the
    /// caller sends the request.
    pub fn request(&mut self, reason: &str, now_ms: u64) -> bool {
        self.check_timeout(now_ms);
        if self.in_progress {
            debug!("Recovery already in progress, ignoring: {}", reason);
            return false;
        }
        if let Some(last) = self.last_request_ms {
            if now_ms.saturating_sub(last) < self.debounce_ms {
                debug!("Recovery debounced: {}", reason);
                return false;
            }
        }

        info!("Requesting snapshot: {}", reason);
        self.in_progress = true;
        self.started_at_ms = Some(now_ms);
        self.last_request_ms = Some(now_ms);
        true
    }

    /// Expire a recovery that never completed. Returns true if it just
    /// timed out.
    pub fn check_timeout(&mut self, now_ms: u64) -> bool {
        let Some(started) = self.started_at_ms else {
            return false;
        };
        if !self.in_progress || now_ms.saturating_sub(started) < self.timeout_ms {
            return false;
        }
        self.in_progress = false;
        self.started_at_ms = None;
        self.consecutive_timeouts += 1;
        warn!(
            "Snapshot request timed out ({} in a row)",
            self.consecutive_timeouts
        );
        true
    }

    pub fn complete(&mut self) {
        if self.in_progress {
            debug!("Recovery complete");
        }
        self.in_progress = false;
        self.started_at_ms = None;
        self.consecutive_timeouts = 0;
    }

    pub fn reset(&mut self) {
        self.in_progress = false;
        self.started_at_ms = None;
        self.last_request_ms = None;
        self.consecutive_timeouts = 0;
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }
}
