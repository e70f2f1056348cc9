// Outbox: queue edits made while the session connection is down
//
// Messages are held in memory and replayed after the next snapshot. The
// queue is bounded: on overflow the lowest-priority oldest entry goes first,
// and consecutive writes to the same value collapse into one.

use crate::action::MutationKind;
use crate::protocol::ClientMessage;
use crate::sync::subject::Subject;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Replay priority; structure changes outrank grid edits, which outrank
/// continuous controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn for_kind(kind: MutationKind) -> Self {
        match kind {
            MutationKind::AddTrack
            | MutationKind::DeleteTrack
            | MutationKind::ClearTrack
            | MutationKind::SetTrackStepCount => Priority::High,
            MutationKind::SetTempo
            | MutationKind::SetSwing
            | MutationKind::SetTrackVolume
            | MutationKind::SetTrackTranspose => Priority::Low,
            _ => Priority::Normal,
        }
    }

    pub fn for_message(message: &ClientMessage) -> Self {
        message
            .mutation_kind()
            .map(Priority::for_kind)
            .unwrap_or(Priority::Normal)
    }
}

/// Whether a later write of this kind fully replaces an earlier one.
/// Toggles and structural edits never do.
fn is_set_value(kind: MutationKind) -> bool {
    matches!(
        kind,
        MutationKind::SetParameterLock
            | MutationKind::SetTempo
            | MutationKind::SetSwing
            | MutationKind::SetTrackSample
            | MutationKind::SetTrackVolume
            | MutationKind::SetTrackTranspose
            | MutationKind::SetTrackStepCount
            | MutationKind::SetTrackPlaybackMode
            | MutationKind::SetSessionName
    )
}

/// A queued outbound message
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub message: ClientMessage,
    pub priority: Priority,
    /// When this was queued (unix ms)
    pub enqueued_at_ms: u64,
}

impl QueuedMessage {
    fn coalesce_key(&self) -> Option<(MutationKind, Subject)> {
        let kind = self.message.mutation_kind()?;
        if !is_set_value(kind) {
            return None;
        }
        Some((kind, self.message.subject()?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Queued,
    /// Replaced the previous entry for the same value
    Coalesced,
    /// Queued after evicting an older, lower-priority entry
    Evicted(QueuedMessage),
    /// The queue was full of higher-priority entries; the new message was
    /// dropped
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: usize,
    pub expired: usize,
}

/// Bounded offline message queue
pub struct MessageQueue {
    entries: VecDeque<QueuedMessage>,
    capacity: usize,
    max_age_ms: u64,
}

impl MessageQueue {
    pub fn new(capacity: usize, max_age_ms: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            max_age_ms,
        }
    }

    pub fn enqueue(
        &mut self,
        message: ClientMessage,
        priority: Priority,
        now_ms: u64,
    ) -> EnqueueOutcome {
        let incoming = QueuedMessage {
            message,
            priority,
            enqueued_at_ms: now_ms,
        };

        if let (Some(last), Some(key)) = (self.entries.back_mut(), incoming.coalesce_key()) {
            if last.coalesce_key().as_ref() == Some(&key) {
                debug!("Coalesced queued {} for {}", key.0, key.1);
                *last = incoming;
                return EnqueueOutcome::Coalesced;
            }
        }

        self.remove_expired(now_ms);

        if self.entries.len() < self.capacity {
            self.entries.push_back(incoming);
            return EnqueueOutcome::Queued;
        }

        let victim = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(i, m)| (m.priority, m.enqueued_at_ms, *i))
            .map(|(i, m)| (i, m.priority));

        match victim {
            Some((index, lowest)) if incoming.priority >= lowest => {
                let evicted = self.entries.remove(index);
                self.entries.push_back(incoming);
                match evicted {
                    Some(evicted) => {
                        warn!(
                            "Outbox full ({}), evicted queued {}",
                            self.capacity,
                            evicted.message.message_type()
                        );
                        EnqueueOutcome::Evicted(evicted)
                    }
                    None => EnqueueOutcome::Queued,
                }
            }
            _ => {
                warn!(
                    "Outbox full ({}), dropped {}",
                    self.capacity,
                    incoming.message.message_type()
                );
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Take every queued message that is still fresh, oldest first.
    /// Returns the fresh entries and how many expired.
    fn drain_fresh(&mut self, now_ms: u64) -> (Vec<QueuedMessage>, usize) {
        let expired = self.remove_expired(now_ms);
        (self.entries.drain(..).collect(), expired)
    }

    /// Hand every fresh entry to `send`, in queue order, and empty the queue
    pub fn replay<F>(&mut self, now_ms: u64, mut send: F) -> ReplayReport
    where
        F: FnMut(QueuedMessage),
    {
        let (fresh, expired) = self.drain_fresh(now_ms);
        let replayed = fresh.len();
        for entry in fresh {
            send(entry);
        }
        ReplayReport { replayed, expired }
    }

    /// Drop entries older than the max age
    pub fn remove_expired(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        let max_age = self.max_age_ms;
        self.entries
            .retain(|m| now_ms.saturating_sub(m.enqueued_at_ms) <= max_age);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Dropped {} expired queued messages", removed);
        }
        removed
    }

    pub fn peek(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toggle(track: &str, step: usize) -> ClientMessage {
        ClientMessage::ToggleStep {
            track_id: track.to_string(),
            step,
        }
    }

    fn tempo(bpm: f64) -> ClientMessage {
        ClientMessage::SetTempo { tempo: bpm }
    }

    fn enqueue(queue: &mut MessageQueue, message: ClientMessage, now: u64) -> EnqueueOutcome {
        let priority = Priority::for_message(&message);
        queue.enqueue(message, priority, now)
    }

    #[test]
    fn test_priorities() {
        assert_eq!(Priority::for_kind(MutationKind::AddTrack), Priority::High);
        assert_eq!(Priority::for_kind(MutationKind::ToggleStep), Priority::Normal);
        assert_eq!(Priority::for_kind(MutationKind::SetSessionName), Priority::Normal);
        assert_eq!(Priority::for_kind(MutationKind::SetTempo), Priority::Low);
        assert!(Priority::High > Priority::Normal && Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_tempo_changes_coalesce() {
        let mut queue = MessageQueue::new(10, 30_000);
        assert_eq!(enqueue(&mut queue, tempo(100.0), 0), EnqueueOutcome::Queued);
        assert_eq!(enqueue(&mut queue, tempo(110.0), 1), EnqueueOutcome::Coalesced);
        assert_eq!(enqueue(&mut queue, tempo(120.0), 2), EnqueueOutcome::Coalesced);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().next().unwrap().message, tempo(120.0));
    }

    #[test]
    fn test_toggles_never_coalesce() {
        let mut queue = MessageQueue::new(10, 30_000);
        enqueue(&mut queue, toggle("kick", 0), 0);
        assert_eq!(enqueue(&mut queue, toggle("kick", 0), 1), EnqueueOutcome::Queued);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_interleaved_targets_prevent_coalescing() {
        let mut queue = MessageQueue::new(10, 30_000);
        enqueue(&mut queue, tempo(100.0), 0);
        enqueue(&mut queue, ClientMessage::SetSwing { swing: 20.0 }, 1);
        enqueue(&mut queue, tempo(110.0), 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_overflow_evicts_lowest_priority_oldest() {
        let mut queue = MessageQueue::new(3, 30_000);
        enqueue(&mut queue, toggle("kick", 0), 0);
        enqueue(&mut queue, tempo(90.0), 1);
        enqueue(&mut queue, ClientMessage::SetSwing { swing: 5.0 }, 2);

        match enqueue(&mut queue, toggle("kick", 1), 3) {
            EnqueueOutcome::Evicted(evicted) => assert_eq!(evicted.message, tempo(90.0)),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(queue.len(), 3);
        assert!(queue.peek().all(|m| m.message != tempo(90.0)));
    }

    #[test]
    fn test_overflow_drops_incoming_when_strictly_lowest() {
        let mut queue = MessageQueue::new(2, 30_000);
        enqueue(&mut queue, toggle("kick", 0), 0);
        enqueue(&mut queue, toggle("kick", 1), 1);
        assert_eq!(enqueue(&mut queue, tempo(90.0), 2), EnqueueOutcome::Dropped);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut queue = MessageQueue::new(100, 30_000);
        for i in 0..250 {
            enqueue(&mut queue, toggle("hat", i % 16), i as u64);
            assert!(queue.len() <= 100);
        }
        assert_eq!(queue.len(), 100);
    }

    #[test]
    fn test_replay_skips_expired() {
        let mut queue = MessageQueue::new(10, 30_000);
        enqueue(&mut queue, toggle("kick", 0), 0);
        enqueue(&mut queue, toggle("kick", 1), 20_000);

        let mut sent = Vec::new();
        let report = queue.replay(40_000, |m| sent.push(m.message));
        assert_eq!(report, ReplayReport { replayed: 1, expired: 1 });
        assert_eq!(sent, vec![toggle("kick", 1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_replay_preserves_order() {
        let mut queue = MessageQueue::new(10, 30_000);
        enqueue(&mut queue, toggle("kick", 0), 0);
        enqueue(&mut queue, ClientMessage::DeleteTrack { track_id: "hat".into() }, 1);
        enqueue(&mut queue, tempo(100.0), 2);

        let (fresh, expired) = queue.drain_fresh(3);
        assert_eq!(expired, 0);
        let types: Vec<&str> = fresh.iter().map(|m| m.message.message_type()).collect();
        assert_eq!(types, vec!["toggle_step", "delete_track", "set_tempo"]);
    }
}
