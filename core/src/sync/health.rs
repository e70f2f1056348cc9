// Sync health: server sequence tracking and hash-check bookkeeping

use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncHealthMetrics {
    pub last_server_seq: Option<u64>,
    pub out_of_order_count: u64,
    pub consecutive_out_of_order: u32,
    pub missed_count: u64,
    pub consecutive_hash_mismatches: u32,
    pub total_hash_mismatches: u64,
}

/// Result of recording one server sequence number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCheck {
    /// Messages skipped between the previous sequence and this one
    pub missed_count: u64,
    /// Duplicate or regressed sequence
    pub out_of_order: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    RequestSnapshot,
    Reconnect,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::None => write!(f, "none"),
            RecoveryAction::RequestSnapshot => write!(f, "request_snapshot"),
            RecoveryAction::Reconnect => write!(f, "reconnect"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryNeed {
    pub needed: bool,
    pub reason: Option<String>,
    pub action: RecoveryAction,
}

impl RecoveryNeed {
    fn none() -> Self {
        Self {
            needed: false,
            reason: None,
            action: RecoveryAction::None,
        }
    }
}

pub struct SyncHealth {
    metrics: SyncHealthMetrics,
    out_of_order_threshold: u32,
    hash_mismatch_threshold: u32,
}

impl SyncHealth {
    pub fn new(out_of_order_threshold: u32, hash_mismatch_threshold: u32) -> Self {
        Self {
            metrics: SyncHealthMetrics::default(),
            out_of_order_threshold,
            hash_mismatch_threshold,
        }
    }

    pub fn record_server_sequence(&mut self, seq: u64) -> SequenceCheck {
        let m = &mut self.metrics;
        let Some(last) = m.last_server_seq else {
            m.last_server_seq = Some(seq);
            return SequenceCheck::default();
        };

        if seq <= last {
            m.out_of_order_count += 1;
            m.consecutive_out_of_order += 1;
            debug!(
                "Out-of-order server seq {} (last {}), {} in a row",
                seq, last, m.consecutive_out_of_order
            );
            return SequenceCheck {
                missed_count: 0,
                out_of_order: true,
            };
        }

        m.consecutive_out_of_order = 0;
        m.last_server_seq = Some(seq);
        let missed = seq - last - 1;
        if missed > 0 {
            m.missed_count += missed;
            warn!("Sequence gap: missed {} messages before seq {}", missed, seq);
        }
        SequenceCheck {
            missed_count: missed,
            out_of_order: false,
        }
    }

    pub fn record_hash_check(&mut self, matched: bool) {
        if matched {
            self.metrics.consecutive_hash_mismatches = 0;
        } else {
            self.metrics.consecutive_hash_mismatches += 1;
            self.metrics.total_hash_mismatches += 1;
            warn!(
                "State hash mismatch ({} consecutive)",
                self.metrics.consecutive_hash_mismatches
            );
        }
    }

    pub fn needs_recovery(&self) -> RecoveryNeed {
        let m = &self.metrics;
        if m.consecutive_out_of_order >= self.out_of_order_threshold {
            return RecoveryNeed {
                needed: true,
                reason: Some(format!(
                    "{} consecutive out-of-order messages",
                    m.consecutive_out_of_order
                )),
                action: RecoveryAction::Reconnect,
            };
        }
        if m.consecutive_hash_mismatches >= self.hash_mismatch_threshold {
            return RecoveryNeed {
                needed: true,
                reason: Some(format!(
                    "{} consecutive hash mismatches",
                    m.consecutive_hash_mismatches
                )),
                action: RecoveryAction::RequestSnapshot,
            };
        }
        RecoveryNeed::none()
    }

    /// Adopt a snapshot's server sequence as the new baseline
    pub fn rebase(&mut self, seq: Option<u64>) {
        if seq.is_some() {
            self.metrics.last_server_seq = seq;
        }
        self.metrics.consecutive_out_of_order = 0;
    }

    pub fn reset_recovery_flags(&mut self) {
        self.metrics.consecutive_out_of_order = 0;
        self.metrics.consecutive_hash_mismatches = 0;
    }

    pub fn reset(&mut self) {
        self.metrics = SyncHealthMetrics::default();
    }

    pub fn metrics(&self) -> SyncHealthMetrics {
        self.metrics
    }

    pub fn last_server_seq(&self) -> Option<u64> {
        self.metrics.last_server_seq
    }
}
