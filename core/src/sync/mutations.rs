//! Mutation tracker
//!
//! Every synchronized edit this client sends is tracked by its client
//! sequence number until the server settles it:
//!
//! - **Confirmed**: the server broadcast it back with our `clientSeq`.
//! - **Superseded**: another client's edit to an overlapping subject
//!   arrived first.
//! - **Lost**: nothing happened within the timeout, or a snapshot taken
//!   after we sent it shows a different value.
//!
//! Settled states are terminal. A confirmed mutation that a later snapshot
//! contradicts is reported as a regression but stays confirmed.

use crate::action::MutationKind;
use crate::model::SessionState;
use crate::sync::subject::{IntendedValue, Subject};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationState {
    Pending,
    Confirmed,
    Superseded,
    Lost,
}

impl MutationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MutationState::Pending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub seq: u64,
    pub kind: MutationKind,
    pub subject: Subject,
    /// Value the subject held locally right after the optimistic apply
    pub intended: Option<IntendedValue>,
    pub sent_at_ms: u64,
    /// Send time translated to the server clock
    pub sent_at_server_ms: u64,
    pub state: MutationState,
    pub confirmed_server_seq: Option<u64>,
    pub settled_at_ms: Option<u64>,
    /// A later remote edit touched the subject after confirmation
    pub overwritten: bool,
}

impl Mutation {
    pub fn new(
        seq: u64,
        kind: MutationKind,
        subject: Subject,
        intended: Option<IntendedValue>,
        sent_at_ms: u64,
        sent_at_server_ms: u64,
    ) -> Self {
        Self {
            seq,
            kind,
            subject,
            intended,
            sent_at_ms,
            sent_at_server_ms,
            state: MutationState::Pending,
            confirmed_server_seq: None,
            settled_at_ms: None,
            overwritten: false,
        }
    }

    fn contradicted_by(&self, state: &SessionState) -> Option<IntendedValue> {
        let intended = self.intended.as_ref()?;
        let actual = self.subject.value_in(state)?;
        (!intended.matches(&actual)).then_some(actual)
    }
}

/// Outcome of comparing tracked mutations against a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotCheck {
    /// Pending mutations the snapshot proved lost
    pub lost: Vec<u64>,
    /// Confirmed mutations the snapshot contradicts
    pub regressions: Vec<u64>,
}

impl SnapshotCheck {
    pub fn is_clean(&self) -> bool {
        self.lost.is_empty() && self.regressions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub timed_out: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub pending: usize,
    pub confirmed: usize,
    pub superseded: usize,
    pub lost: usize,
    pub total_tracked: u64,
    pub total_confirmed: u64,
    pub total_superseded: u64,
    pub total_lost: u64,
}

pub struct MutationTracker {
    mutations: BTreeMap<u64, Mutation>,
    timeout_ms: u64,
    grace_ms: u64,
    total_tracked: u64,
    total_confirmed: u64,
    total_superseded: u64,
    total_lost: u64,
}

impl MutationTracker {
    pub fn new(timeout_ms: u64, grace_ms: u64) -> Self {
        Self {
            mutations: BTreeMap::new(),
            timeout_ms,
            grace_ms,
            total_tracked: 0,
            total_confirmed: 0,
            total_superseded: 0,
            total_lost: 0,
        }
    }

    pub fn track(&mut self, mutation: Mutation) {
        debug!(
            "Tracking mutation {} ({} {})",
            mutation.seq, mutation.kind, mutation.subject
        );
        self.total_tracked += 1;
        self.mutations.insert(mutation.seq, mutation);
    }

    pub fn get(&self, seq: u64) -> Option<&Mutation> {
        self.mutations.get(&seq)
    }

    fn settle(&mut self, seq: u64, state: MutationState, now_ms: u64) -> bool {
        let Some(mutation) = self.mutations.get_mut(&seq) else {
            return false;
        };
        if mutation.state.is_terminal() {
            return false;
        }
        mutation.state = state;
        mutation.settled_at_ms = Some(now_ms);
        match state {
            MutationState::Confirmed => self.total_confirmed += 1,
            MutationState::Superseded => self.total_superseded += 1,
            MutationState::Lost => self.total_lost += 1,
            MutationState::Pending => {}
        }
        true
    }

    /// Server echoed our client sequence
    pub fn confirm(&mut self, seq: u64, server_seq: Option<u64>, now_ms: u64) -> bool {
        if !self.settle(seq, MutationState::Confirmed, now_ms) {
            return false;
        }
        if let Some(mutation) = self.mutations.get_mut(&seq) {
            mutation.confirmed_server_seq = server_seq;
        }
        debug!("Mutation {} confirmed (server seq {:?})", seq, server_seq);
        true
    }

    pub fn mark_superseded(&mut self, seq: u64, now_ms: u64) -> bool {
        self.settle(seq, MutationState::Superseded, now_ms)
    }

    pub fn mark_lost(&mut self, seq: u64, now_ms: u64, reason: &str) -> bool {
        if !self.settle(seq, MutationState::Lost, now_ms) {
            return false;
        }
        if let Some(mutation) = self.mutations.get(&seq) {
            warn!(
                "Mutation {} ({} {}) lost: {}",
                seq, mutation.kind, mutation.subject, reason
            );
        }
        true
    }

    /// A remote edit landed on `subject`: pending mutations on overlapping
    /// subjects lost the race. Returns the superseded sequences.
    pub fn supersede_overlapping(&mut self, subject: &Subject, now_ms: u64) -> Vec<u64> {
        let mut superseded = Vec::new();
        for mutation in self.mutations.values_mut() {
            if !mutation.subject.overlaps(subject) {
                continue;
            }
            match mutation.state {
                MutationState::Pending => {
                    mutation.state = MutationState::Superseded;
                    mutation.settled_at_ms = Some(now_ms);
                    superseded.push(mutation.seq);
                }
                MutationState::Confirmed => mutation.overwritten = true,
                MutationState::Superseded | MutationState::Lost => {}
            }
        }
        self.total_superseded += superseded.len() as u64;
        if !superseded.is_empty() {
            debug!("Superseded mutations {:?} on {}", superseded, subject);
        }
        superseded
    }

    /// Time out stale pending mutations and forget long-settled ones
    pub fn prune_expired(&mut self, now_ms: u64) -> PruneReport {
        let timeout = self.timeout_ms;
        let expired: Vec<u64> = self
            .mutations
            .values()
            .filter(|m| {
                m.state == MutationState::Pending
                    && now_ms.saturating_sub(m.sent_at_ms) > timeout
            })
            .map(|m| m.seq)
            .collect();
        for seq in &expired {
            self.mark_lost(*seq, now_ms, "no confirmation before timeout");
        }

        let before = self.mutations.len();
        self.mutations.retain(|_, m| match m.settled_at_ms {
            Some(settled) if m.state.is_terminal() => now_ms.saturating_sub(settled) <= timeout,
            _ => true,
        });

        PruneReport {
            timed_out: expired.len(),
            removed: before - self.mutations.len(),
        }
    }

    /// Compare tracked mutations with an authoritative snapshot.
    ///
    /// Pending mutations are only judged when the snapshot was generated
    /// comfortably after they were sent; earlier snapshots cannot have
    /// seen them.
    pub fn check_against_snapshot(
        &mut self,
        state: &SessionState,
        snapshot_timestamp: u64,
        snapshot_seq: Option<u64>,
        now_ms: u64,
    ) -> SnapshotCheck {
        let mut check = SnapshotCheck::default();
        let grace = self.grace_ms;

        let mut newly_lost = Vec::new();
        for mutation in self.mutations.values() {
            // A later edit of ours to the same subject decides its final value
            if self.is_shadowed(mutation) {
                continue;
            }
            match mutation.state {
                MutationState::Pending => {
                    if mutation.sent_at_server_ms + grace >= snapshot_timestamp {
                        continue;
                    }
                    if let Some(actual) = mutation.contradicted_by(state) {
                        newly_lost.push((mutation.seq, actual));
                    }
                }
                MutationState::Confirmed => {
                    if mutation.overwritten {
                        continue;
                    }
                    let included = match (mutation.confirmed_server_seq, snapshot_seq) {
                        (Some(confirmed), Some(snapshot)) => confirmed <= snapshot,
                        _ => true,
                    };
                    if !included {
                        continue;
                    }
                    if let Some(actual) = mutation.contradicted_by(state) {
                        warn!(
                            "Snapshot regressed confirmed mutation {} ({} {}): expected {:?}, snapshot has {}",
                            mutation.seq, mutation.kind, mutation.subject, mutation.intended, actual
                        );
                        check.regressions.push(mutation.seq);
                    }
                }
                MutationState::Superseded | MutationState::Lost => {}
            }
        }

        for (seq, actual) in newly_lost {
            let reason = format!("snapshot contradicts intended value (has {})", actual);
            self.mark_lost(seq, now_ms, &reason);
            check.lost.push(seq);
        }
        check
    }

    fn is_shadowed(&self, mutation: &Mutation) -> bool {
        self.mutations
            .range(mutation.seq + 1..)
            .any(|(_, later)| later.subject == mutation.subject)
    }

    /// Forget everything the snapshot made redundant. Pending mutations and
    /// ones confirmed after the snapshot's sequence are kept.
    pub fn clear_on_snapshot(&mut self, snapshot_seq: Option<u64>) -> usize {
        let before = self.mutations.len();
        self.mutations.retain(|_, m| match m.state {
            MutationState::Pending => true,
            MutationState::Superseded | MutationState::Lost => false,
            MutationState::Confirmed => match (snapshot_seq, m.confirmed_server_seq) {
                (Some(snapshot), Some(confirmed)) => confirmed > snapshot,
                _ => false,
            },
        });
        before - self.mutations.len()
    }

    pub fn pending_count(&self) -> usize {
        self.count(MutationState::Pending)
    }

    fn count(&self, state: MutationState) -> usize {
        self.mutations.values().filter(|m| m.state == state).count()
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            pending: self.count(MutationState::Pending),
            confirmed: self.count(MutationState::Confirmed),
            superseded: self.count(MutationState::Superseded),
            lost: self.count(MutationState::Lost),
            total_tracked: self.total_tracked,
            total_confirmed: self.total_confirmed,
            total_superseded: self.total_superseded,
            total_lost: self.total_lost,
        }
    }

    /// Start a new generation. Lifetime totals are kept.
    pub fn reset(&mut self) {
        self.mutations.clear();
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Track;

    const TIMEOUT: u64 = 30_000;

    fn tracker() -> MutationTracker {
        MutationTracker::new(TIMEOUT, 1_000)
    }

    fn toggle(seq: u64, step: usize, value: bool, sent_at: u64) -> Mutation {
        Mutation::new(
            seq,
            MutationKind::ToggleStep,
            Subject::step("kick", step),
            Some(IntendedValue::Bool(value)),
            sent_at,
            sent_at,
        )
    }

    fn state_with_steps(active: &[usize]) -> SessionState {
        let mut track = Track::new("kick", "808");
        for step in active {
            track.steps[*step] = true;
        }
        SessionState {
            tracks: vec![track],
            ..SessionState::default()
        }
    }

    #[test]
    fn test_confirm_pending() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 100));
        assert!(tracker.confirm(1, Some(10), 200));

        let mutation = tracker.get(1).unwrap();
        assert_eq!(mutation.state, MutationState::Confirmed);
        assert_eq!(mutation.confirmed_server_seq, Some(10));
        assert_eq!(mutation.settled_at_ms, Some(200));
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 0));
        tracker.track(toggle(2, 1, true, 0));
        assert!(tracker.mark_lost(1, 10, "test"));
        assert!(!tracker.confirm(1, Some(3), 20));
        assert!(!tracker.mark_superseded(1, 20));
        assert_eq!(tracker.get(1).unwrap().state, MutationState::Lost);

        assert!(tracker.confirm(2, None, 10));
        assert!(!tracker.mark_lost(2, 20, "test"));
        assert!(!tracker.confirm(2, None, 30));
        assert!(!tracker.confirm(99, None, 30));
    }

    #[test]
    fn test_supersede_overlapping() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 0));
        tracker.track(toggle(2, 5, true, 0));
        tracker.track(Mutation::new(
            3,
            MutationKind::SetTempo,
            Subject::Tempo,
            Some(IntendedValue::Number(90.0)),
            0,
            0,
        ));

        assert_eq!(tracker.supersede_overlapping(&Subject::step("kick", 5), 50), vec![2]);
        // Deleting the track overrides everything else on it
        assert_eq!(tracker.supersede_overlapping(&Subject::track("kick"), 60), vec![1]);
        assert_eq!(tracker.get(3).unwrap().state, MutationState::Pending);
        assert_eq!(tracker.stats().superseded, 2);
    }

    #[test]
    fn test_prune_times_out_then_removes() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 0));
        tracker.track(toggle(2, 1, true, 25_000));

        let report = tracker.prune_expired(TIMEOUT + 1);
        assert_eq!(report, PruneReport { timed_out: 1, removed: 0 });
        assert_eq!(tracker.get(1).unwrap().state, MutationState::Lost);
        assert_eq!(tracker.get(2).unwrap().state, MutationState::Pending);

        let report = tracker.prune_expired(2 * TIMEOUT + 2);
        assert_eq!(report.removed, 1);
        assert!(tracker.get(1).is_none());
        // Seq 2 timed out in the same pass and is still fresh as a lost entry
        assert_eq!(tracker.get(2).unwrap().state, MutationState::Lost);
    }

    #[test]
    fn test_snapshot_after_send_marks_contradicted_pending_lost() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 1_000));
        tracker.track(toggle(2, 1, true, 1_000));

        let snapshot = state_with_steps(&[1]);
        let check = tracker.check_against_snapshot(&snapshot, 5_000, None, 5_100);
        assert_eq!(check.lost, vec![1]);
        assert!(check.regressions.is_empty());
        assert_eq!(tracker.get(1).unwrap().state, MutationState::Lost);
        assert_eq!(tracker.get(2).unwrap().state, MutationState::Pending);
    }

    #[test]
    fn test_later_edit_on_same_step_shadows_earlier() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 1_000));
        tracker.track(toggle(2, 0, false, 1_200));

        let check = tracker.check_against_snapshot(&state_with_steps(&[]), 5_000, None, 5_100);
        assert!(check.is_clean());
        assert_eq!(tracker.get(1).unwrap().state, MutationState::Pending);
        assert_eq!(tracker.get(2).unwrap().state, MutationState::Pending);

        // The newest edit is still judged on its own
        let check = tracker.check_against_snapshot(&state_with_steps(&[0]), 5_000, None, 5_100);
        assert_eq!(check.lost, vec![2]);
        assert_eq!(tracker.get(1).unwrap().state, MutationState::Pending);
    }

    #[test]
    fn test_snapshot_within_grace_does_not_judge() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 4_500));
        let check = tracker.check_against_snapshot(&state_with_steps(&[]), 5_000, None, 5_100);
        assert!(check.is_clean());
        assert_eq!(tracker.get(1).unwrap().state, MutationState::Pending);
    }

    #[test]
    fn test_confirmed_regression_is_reported_not_changed() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 0));
        tracker.confirm(1, Some(10), 50);

        let snapshot = state_with_steps(&[]);
        let check = tracker.check_against_snapshot(&snapshot, 10_000, Some(12), 10_000);
        assert_eq!(check.regressions, vec![1]);
        assert_eq!(tracker.get(1).unwrap().state, MutationState::Confirmed);

        // Snapshot older than the confirmation cannot regress it
        let check = tracker.check_against_snapshot(&snapshot, 10_000, Some(9), 10_000);
        assert!(check.regressions.is_empty());
    }

    #[test]
    fn test_remote_overwrite_is_not_a_regression() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 0));
        tracker.confirm(1, Some(10), 50);
        tracker.supersede_overlapping(&Subject::step("kick", 0), 60);
        assert_eq!(tracker.get(1).unwrap().state, MutationState::Confirmed);

        let check = tracker.check_against_snapshot(&state_with_steps(&[]), 10_000, Some(12), 10_000);
        assert!(check.is_clean());
    }

    #[test]
    fn test_clear_on_snapshot() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 0));
        tracker.track(toggle(2, 1, true, 0));
        tracker.track(toggle(3, 2, true, 0));
        tracker.track(toggle(4, 3, true, 0));
        tracker.confirm(1, Some(5), 10);
        tracker.confirm(2, Some(9), 10);
        tracker.mark_lost(3, 10, "test");

        assert_eq!(tracker.clear_on_snapshot(Some(6)), 2);
        assert!(tracker.get(1).is_none());
        assert!(tracker.get(2).is_some());
        assert!(tracker.get(3).is_none());
        assert_eq!(tracker.get(4).unwrap().state, MutationState::Pending);

        assert_eq!(tracker.clear_on_snapshot(None), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_stats_and_reset() {
        let mut tracker = tracker();
        tracker.track(toggle(1, 0, true, 0));
        tracker.track(toggle(2, 1, true, 0));
        tracker.confirm(1, None, 1);

        let stats = tracker.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.total_tracked, 2);

        tracker.reset();
        assert!(tracker.is_empty());
        assert_eq!(tracker.stats().total_confirmed, 1);
    }
}
