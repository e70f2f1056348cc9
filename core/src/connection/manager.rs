// Connection manager: the sync engine's orchestrator
//
// Owns the connection state machine and every sync component. All I/O goes
// through the injected Transport and Scheduler; events come back in through
// the handle_* methods tagged with the generation they belong to. A
// generation starts each time the transport is opened, and anything tagged
// with an older one is ignored.

use super::backoff::backoff_duration;
use super::{
    CloseInfo, ConnectionState, ConnectionStatus, Scheduler, StatusListener, SubscriptionId,
    Timer, Transport,
};
use crate::action::{Action, Dispatcher, PresenceEvent, StateSource};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::model::{PlayerInfo, SessionState};
use crate::protocol::{
    decode_server, encode_client, Broadcast, ClientEnvelope, ClientMessage, ServerMessage,
};
use crate::sync::classify::{classify, is_synchronized, SyncClass};
use crate::sync::hash::hash_state;
use crate::sync::health::RecoveryAction;
use crate::sync::mutations::Mutation;
use crate::sync::outbox::{EnqueueOutcome, Priority};
use crate::sync::{
    ClockSync, ConfirmedState, MessageQueue, MutationTracker, RecoveryManager, SyncHealth,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info, warn};

const RESYNC_FAILED: &str = "Unable to resynchronize with the session";

pub struct ConnectionManager<T: Transport, S: Scheduler, D: Dispatcher> {
    config: SyncConfig,
    transport: T,
    scheduler: S,
    dispatcher: D,
    state_source: Option<Box<dyn StateSource>>,
    clock: Arc<dyn Clock>,
    rng: StdRng,

    state: ConnectionState,
    session_id: Option<String>,
    generation: u64,
    reconnect_attempts: u32,
    error: Option<String>,
    player_id: Option<String>,
    next_seq: u64,
    snapshot_received: bool,
    last_snapshot_timestamp: Option<u64>,

    outbox: MessageQueue,
    tracker: MutationTracker,
    confirmed: ConfirmedState,
    health: SyncHealth,
    recovery: RecoveryManager,
    clock_sync: ClockSync,

    subscribers: Vec<(SubscriptionId, StatusListener)>,
    next_subscription: u64,
}

impl<T: Transport, S: Scheduler, D: Dispatcher> ConnectionManager<T, S, D> {
    pub fn new(
        config: SyncConfig,
        transport: T,
        scheduler: S,
        dispatcher: D,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            outbox: MessageQueue::new(config.outbox.capacity, config.outbox.max_age_ms),
            tracker: MutationTracker::new(
                config.mutations.timeout_ms,
                config.mutations.snapshot_grace_ms,
            ),
            confirmed: ConfirmedState::new(),
            health: SyncHealth::new(
                config.health.out_of_order_threshold,
                config.health.hash_mismatch_threshold,
            ),
            recovery: RecoveryManager::new(config.recovery.debounce_ms, config.recovery.timeout_ms),
            clock_sync: ClockSync::new(config.clock_sync.sample_window),
            config,
            transport,
            scheduler,
            dispatcher,
            state_source: None,
            clock,
            rng: StdRng::from_entropy(),
            state: ConnectionState::Disconnected,
            session_id: None,
            generation: 0,
            reconnect_attempts: 0,
            error: None,
            player_id: None,
            next_seq: 1,
            snapshot_received: false,
            last_snapshot_timestamp: None,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Read local state for hash checks and mutation intents
    pub fn with_state_source(mut self, source: Box<dyn StateSource>) -> Self {
        self.state_source = Some(source);
        self
    }

    /// Seed the jitter source
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    // ---- Commands ----

    pub fn connect(&mut self, session_id: &str) -> Result<()> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!("connect({}) ignored while {}", session_id, self.state);
                Ok(())
            }
            ConnectionState::Disconnected | ConnectionState::Degraded => {
                info!("Connecting to session {}", session_id);
                self.session_id = Some(session_id.to_string());
                self.reconnect_attempts = 0;
                self.error = None;
                self.open_transport();
                Ok(())
            }
        }
    }

    /// Intentional disconnect. Drops queued messages.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        info!("Disconnecting from session");
        self.teardown();
        self.transport.close();
        // Late events from the closed channel must not count as failures
        self.generation += 1;
        self.outbox.clear();
        self.last_snapshot_timestamp = None;
        self.reconnect_attempts = 0;
        self.error = None;
        self.state = ConnectionState::Disconnected;
        self.notify();
    }

    /// Leave single-user mode and start reconnecting
    pub fn retry_connection(&mut self) -> Result<()> {
        if self.state != ConnectionState::Degraded {
            return Err(SyncError::InvalidState {
                operation: "retry connection",
                state: self.state,
            });
        }
        info!("Retrying connection");
        self.reconnect_attempts = 0;
        self.error = None;
        self.open_transport();
        Ok(())
    }

    /// Send a message, or queue it while offline
    pub fn send(&mut self, message: ClientMessage) -> Result<()> {
        let envelope = self.envelope_for(message);
        let frame = match encode_client(&envelope, self.config.max_message_size) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Rejected outgoing {}: {}", envelope.message.message_type(), err);
                if matches!(err, SyncError::MessageTooLarge { .. }) {
                    self.error = Some(err.to_string());
                    self.notify();
                }
                return Err(err);
            }
        };

        // Until the first snapshot replays the outbox, edits queue behind it
        let awaiting_replay = !self.snapshot_received && envelope.message.is_queueable();
        if self.state != ConnectionState::Connected || awaiting_replay {
            self.enqueue_offline(envelope.message);
            return Ok(());
        }
        self.transmit_frame(envelope, frame);
        Ok(())
    }

    /// Forward an action the application already applied locally.
    /// Local-only and internal actions are ignored.
    pub fn send_action(&mut self, action: &Action) -> Result<()> {
        if !is_synchronized(action.kind()) {
            debug!("Not sending {} ({:?})", action.kind(), classify(action.kind()));
            return Ok(());
        }
        match ClientMessage::from_action(action) {
            Some(message) => self.send(message),
            None => Ok(()),
        }
    }

    pub fn subscribe(&mut self, listener: StatusListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            error: self.error.clone(),
            reconnect_attempts: self.reconnect_attempts,
            player_id: self.player_id.clone(),
            queued_messages: self.outbox.len(),
            rtt_ms: self.clock_sync.rtt_ms(),
            clock_offset_ms: self.clock_sync.offset_ms(),
            mutations: self.tracker.stats(),
            health: self.health.metrics(),
        }
    }

    // ---- Transport and timer events ----

    pub fn handle_open(&mut self, generation: u64) {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            debug!("Ignoring stale open (generation {})", generation);
            return;
        }
        info!("Connected (generation {})", generation);
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.error = None;

        self.next_seq = 1;
        self.snapshot_received = false;
        self.tracker.reset();
        self.confirmed.reset();
        self.health.reset();
        self.recovery.reset();

        self.clock_sync.start();
        self.scheduler.schedule_repeating(
            Timer::ClockSync,
            generation,
            self.config.clock_sync_interval(),
        );
        if self.config.hash_check.enabled {
            self.scheduler.schedule_repeating(
                Timer::HashCheck,
                generation,
                self.config.hash_check_interval(),
            );
        }
        self.scheduler.schedule_repeating(
            Timer::MutationPrune,
            generation,
            self.config.prune_interval(),
        );
        self.send_clock_sync();
        self.notify();
    }

    pub fn handle_close(&mut self, generation: u64, info: CloseInfo) {
        if generation != self.generation || self.state == ConnectionState::Disconnected {
            debug!("Ignoring stale close (generation {})", generation);
            return;
        }
        if self.state == ConnectionState::Degraded {
            return;
        }
        warn!(
            "Connection closed (code {:?}): {}",
            info.code, info.reason
        );
        self.teardown();
        self.schedule_reconnect();
    }

    pub fn handle_timer(&mut self, timer: Timer, generation: u64) {
        if generation != self.generation {
            debug!("Ignoring stale {:?} timer", timer);
            return;
        }
        match timer {
            Timer::Reconnect => {
                if self.state == ConnectionState::Connecting {
                    self.open_transport();
                }
            }
            Timer::ClockSync => {
                if self.state == ConnectionState::Connected {
                    self.send_clock_sync();
                }
            }
            Timer::HashCheck => {
                if self.state == ConnectionState::Connected {
                    self.check_recovery_timeout();
                    self.send_state_hash();
                }
            }
            Timer::MutationPrune => {
                if self.state == ConnectionState::Connected {
                    self.check_recovery_timeout();
                }
                let now = self.clock.now_ms();
                let report = self.tracker.prune_expired(now);
                self.outbox.remove_expired(now);
                if report.timed_out > 0 {
                    self.notify();
                }
            }
        }
    }

    pub fn handle_frame(&mut self, generation: u64, text: &str) {
        if generation != self.generation || self.state != ConnectionState::Connected {
            debug!("Ignoring frame from stale generation {}", generation);
            return;
        }
        let envelope = match decode_server(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Dropping undecodable frame: {}", err);
                return;
            }
        };

        let is_snapshot = matches!(envelope.message, ServerMessage::Snapshot { .. });
        if let (Some(seq), false) = (envelope.seq, is_snapshot) {
            let check = self.health.record_server_sequence(seq);
            if check.out_of_order {
                let need = self.health.needs_recovery();
                if need.action == RecoveryAction::Reconnect {
                    let reason = need.reason.unwrap_or_default();
                    self.force_reconnect(&reason);
                    return;
                }
            } else if check.missed_count > 0 {
                self.request_recovery(&format!("missed {} messages", check.missed_count));
            }
        }

        debug!("Received {}", envelope.message.message_type());
        let now = self.clock.now_ms();
        match envelope.message {
            ServerMessage::Snapshot {
                state,
                players,
                player_id,
                snapshot_timestamp,
            } => self.handle_snapshot(state, players, player_id, snapshot_timestamp, envelope.seq),
            ServerMessage::PlayerJoined { player } => {
                self.dispatcher.presence(PresenceEvent::PlayerJoined(player))
            }
            ServerMessage::PlayerLeft { player_id } => {
                self.dispatcher.presence(PresenceEvent::PlayerLeft { player_id })
            }
            ServerMessage::CursorMoved {
                player_id,
                position,
            } => self.dispatcher.presence(PresenceEvent::CursorMoved {
                player_id,
                position,
            }),
            ServerMessage::ClockSyncResponse {
                client_time,
                server_time,
            } => {
                self.clock_sync.handle_response(client_time, server_time, now);
            }
            ServerMessage::StateHashMatch => self.health.record_hash_check(true),
            ServerMessage::StateMismatch { server_hash } => {
                debug!("Server hash {} differs from ours", server_hash);
                self.health.record_hash_check(false);
                let need = self.health.needs_recovery();
                if need.action == RecoveryAction::RequestSnapshot {
                    self.request_recovery(need.reason.as_deref().unwrap_or("hash mismatch"));
                }
            }
            ServerMessage::Error { message } => {
                warn!("Server error: {}", message);
                self.error = Some(message);
                self.notify();
            }
            ref broadcast_message => {
                if let Some(broadcast) = broadcast_message.as_broadcast() {
                    self.handle_broadcast(broadcast, envelope.seq, envelope.client_seq, now);
                }
            }
        }
    }

    // ---- Inbound handling ----

    fn handle_broadcast(
        &mut self,
        broadcast: Broadcast<'_>,
        server_seq: Option<u64>,
        client_seq: Option<u64>,
        now: u64,
    ) {
        self.confirmed.apply(&broadcast.action);

        if self.player_id.as_deref() == Some(broadcast.player_id) {
            // Our own edit coming back; already applied locally
            if let Some(seq) = client_seq {
                self.tracker.confirm(seq, server_seq, now);
            }
            return;
        }

        self.tracker.supersede_overlapping(&broadcast.subject, now);
        if classify(broadcast.kind) == SyncClass::Synchronized {
            self.dispatcher.dispatch(broadcast.action);
        }
    }

    fn handle_snapshot(
        &mut self,
        state: SessionState,
        players: Vec<PlayerInfo>,
        player_id: String,
        snapshot_timestamp: u64,
        snapshot_seq: Option<u64>,
    ) {
        if let Some(last) = self.last_snapshot_timestamp {
            if snapshot_timestamp < last {
                warn!(
                    "Discarding stale snapshot (timestamp {} < {})",
                    snapshot_timestamp, last
                );
                return;
            }
        }
        self.last_snapshot_timestamp = Some(snapshot_timestamp);
        self.player_id = Some(player_id);

        for regression in self.confirmed.find_regressions(&state) {
            warn!("Snapshot regression: {}", regression);
        }

        let now = self.clock.now_ms();
        let check =
            self.tracker
                .check_against_snapshot(&state, snapshot_timestamp, snapshot_seq, now);
        if !check.is_clean() {
            warn!(
                "Snapshot disagrees with tracked mutations: lost {:?}, regressed {:?}",
                check.lost, check.regressions
            );
        }
        self.tracker.clear_on_snapshot(snapshot_seq);
        self.confirmed.reset_from(&state);

        info!(
            "Loaded snapshot: {} tracks, {} players",
            state.tracks.len(),
            players.len()
        );
        self.dispatcher.dispatch(Action::LoadState { state, players });

        self.recovery.complete();
        self.health.reset_recovery_flags();
        self.health.rebase(snapshot_seq);
        if self.error.as_deref() == Some(RESYNC_FAILED) {
            self.error = None;
        }

        if !self.snapshot_received {
            self.snapshot_received = true;
            self.replay_outbox();
        }
        self.notify();
    }

    /// Re-apply and send everything queued while offline. The snapshot just
    /// overwrote the optimistic local effects, so each entry is dispatched
    /// again before it goes out.
    fn replay_outbox(&mut self) {
        let now = self.clock.now_ms();
        let mut fresh = Vec::new();
        let report = self.outbox.replay(now, |entry| fresh.push(entry.message));
        if report.replayed == 0 && report.expired == 0 {
            return;
        }
        info!(
            "Replaying {} queued messages ({} expired)",
            report.replayed, report.expired
        );
        for message in fresh {
            if let Some(action) = message.to_action() {
                self.dispatcher.dispatch(action);
            }
            let envelope = self.envelope_for(message);
            match encode_client(&envelope, self.config.max_message_size) {
                Ok(frame) => self.transmit_frame(envelope, frame),
                Err(err) => warn!("Dropping queued message: {}", err),
            }
        }
    }

    // ---- Outbound ----

    fn envelope_for(&self, message: ClientMessage) -> ClientEnvelope {
        if message.is_sequenced() {
            ClientEnvelope {
                message,
                seq: Some(self.next_seq),
                ack: self.health.last_server_seq(),
            }
        } else {
            ClientEnvelope::unsequenced(message)
        }
    }

    fn transmit_frame(&mut self, envelope: ClientEnvelope, frame: String) {
        match self.transport.send(frame) {
            Ok(()) => {
                debug!(
                    "Sent {} (seq {:?})",
                    envelope.message.message_type(),
                    envelope.seq
                );
                if let Some(seq) = envelope.seq {
                    self.next_seq = seq + 1;
                    self.track_mutation(seq, &envelope.message);
                }
            }
            Err(err) => {
                warn!("Send of {} failed: {}", envelope.message.message_type(), err);
                self.enqueue_offline(envelope.message);
            }
        }
    }

    fn track_mutation(&mut self, seq: u64, message: &ClientMessage) {
        let (Some(kind), Some(subject)) = (message.mutation_kind(), message.subject()) else {
            return;
        };
        let intended = self
            .state_source
            .as_ref()
            .and_then(|source| source.current_state())
            .and_then(|state| subject.value_in(&state));
        let now = self.clock.now_ms();
        let server_now = self.clock_sync.estimated_server_time(now);
        self.tracker
            .track(Mutation::new(seq, kind, subject, intended, now, server_now));
    }

    fn enqueue_offline(&mut self, message: ClientMessage) {
        if !message.is_queueable() {
            debug!("Dropping {} while offline", message.message_type());
            return;
        }
        let priority = Priority::for_message(&message);
        let now = self.clock.now_ms();
        if let EnqueueOutcome::Dropped = self.outbox.enqueue(message, priority, now) {
            debug!("Outbox rejected message");
        }
        self.notify();
    }

    fn send_clock_sync(&mut self) {
        let request = self.clock_sync.request(self.clock.now_ms());
        if let Err(err) = self.send(request) {
            warn!("Clock sync request failed: {}", err);
        }
    }

    fn send_state_hash(&mut self) {
        if !self.snapshot_received {
            return;
        }
        let Some(state) = self.state_source.as_ref().and_then(|s| s.current_state()) else {
            return;
        };
        let hash: String = hash_state(&state).into();
        debug!("Sending state hash {}", hash);
        if let Err(err) = self.send(ClientMessage::StateHash { hash }) {
            warn!("State hash send failed: {}", err);
        }
    }

    fn request_recovery(&mut self, reason: &str) {
        self.check_recovery_timeout();
        let now = self.clock.now_ms();
        if self.recovery.request(reason, now) {
            if let Err(err) = self.send(ClientMessage::RequestSnapshot) {
                warn!("Snapshot request failed: {}", err);
            }
        }
    }

    fn check_recovery_timeout(&mut self) {
        let now = self.clock.now_ms();
        if self.recovery.check_timeout(now)
            && self.recovery.consecutive_timeouts() >= self.config.recovery.max_consecutive_timeouts
        {
            warn!(
                "Snapshot requests timed out {} times in a row",
                self.recovery.consecutive_timeouts()
            );
            self.error = Some(RESYNC_FAILED.to_string());
            self.notify();
        }
    }

    // ---- State machine ----

    fn open_transport(&mut self) {
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        debug!(
            "Opening session {} (generation {}, attempt {})",
            session_id, self.generation, self.reconnect_attempts
        );
        self.transport.open(&session_id, self.generation);
        self.notify();
    }

    /// Cancel every per-generation timer and forget per-generation state
    fn teardown(&mut self) {
        for timer in Timer::ALL {
            self.scheduler.cancel(timer);
        }
        self.clock_sync.stop();
        self.recovery.reset();
        self.tracker.reset();
        self.health.reset();
        self.confirmed.reset();
        self.player_id = None;
        self.snapshot_received = false;
    }

    fn schedule_reconnect(&mut self) {
        self.reconnect_attempts += 1;
        if self.reconnect_attempts >= self.config.reconnect.max_attempts {
            warn!(
                "Giving up after {} reconnect attempts, continuing single-user",
                self.reconnect_attempts
            );
            self.state = ConnectionState::Degraded;
            self.error = Some(format!(
                "Unable to reach the session after {} attempts",
                self.reconnect_attempts
            ));
            self.notify();
            return;
        }

        let delay = backoff_duration(
            &self.config.reconnect,
            self.reconnect_attempts - 1,
            &mut self.rng,
        );
        info!(
            "Reconnecting in {}ms (attempt {})",
            delay.as_millis(),
            self.reconnect_attempts
        );
        self.state = ConnectionState::Connecting;
        self.scheduler
            .schedule_once(Timer::Reconnect, self.generation, delay);
        self.notify();
    }

    fn force_reconnect(&mut self, reason: &str) {
        warn!("Forcing reconnect: {}", reason);
        self.teardown();
        self.transport.close();
        self.generation += 1;
        self.schedule_reconnect();
    }

    fn notify(&self) {
        if self.subscribers.is_empty() {
            return;
        }
        let status = self.status();
        for (_, listener) in &self.subscribers {
            listener(&status);
        }
    }

    // ---- Accessors ----

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn outbox(&self) -> &MessageQueue {
        &self.outbox
    }

    pub fn tracker(&self) -> &MutationTracker {
        &self.tracker
    }

    pub fn clock_sync(&self) -> &ClockSync {
        &self.clock_sync
    }

    pub fn estimated_server_time(&self) -> u64 {
        self.clock_sync.estimated_server_time(self.clock.now_ms())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }
}
