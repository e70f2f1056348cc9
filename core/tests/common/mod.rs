// Shared fixtures for the integration tests: an in-process session server
// and a minimal reducer that the engine drives.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepsync_core::protocol::{decode_client, encode_server};
use stepsync_core::{
    hash_state, Action, ClientEnvelope, ClientMessage, ConnectionStatus, Dispatcher, PlayerInfo,
    SessionState, StateSource, SyncConfig, SyncHandle, Track,
};
use stepsync_core::{ServerEnvelope, ServerMessage};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;

pub const PLAYER_ID: &str = "me";

#[derive(Default)]
struct ServerInner {
    state: SessionState,
    seq: u64,
    received: Vec<ClientEnvelope>,
    hash_matches: usize,
    hash_mismatches: usize,
}

/// A single-session server speaking the wire protocol over WebSocket
#[derive(Clone)]
pub struct TestServer {
    pub url: String,
    inner: Arc<Mutex<ServerInner>>,
    accepting: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    kick: Arc<Notify>,
    remote: Arc<tokio::sync::broadcast::Sender<String>>,
}

impl TestServer {
    pub async fn start(initial: SessionState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (remote, _) = tokio::sync::broadcast::channel(64);
        let server = TestServer {
            url: format!("ws://{}/api/sessions", addr),
            inner: Arc::new(Mutex::new(ServerInner {
                state: initial,
                ..Default::default()
            })),
            accepting: Arc::new(AtomicBool::new(true)),
            connections: Arc::new(AtomicUsize::new(0)),
            kick: Arc::new(Notify::new()),
            remote: Arc::new(remote),
        };

        let accept = server.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if !accept.accepting.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                let conn = accept.clone();
                tokio::spawn(async move { conn.serve(stream).await });
            }
        });
        server
    }

    async fn serve(self, stream: tokio::net::TcpStream) {
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        self.connections.fetch_add(1, Ordering::SeqCst);
        let (mut sink, mut source) = ws.split();
        let mut remote = self.remote.subscribe();

        if sink.send(Message::Text(self.snapshot_frame())).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = self.kick.notified() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Ok(frame) = remote.recv() => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        for reply in self.handle(&text) {
                            if sink.send(Message::Text(reply)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    fn snapshot_frame(&self) -> String {
        let inner = self.inner.lock();
        let mut envelope = ServerEnvelope::new(ServerMessage::Snapshot {
            state: inner.state.clone(),
            players: vec![PlayerInfo {
                id: PLAYER_ID.into(),
                name: "Me".into(),
                color: None,
            }],
            player_id: PLAYER_ID.into(),
            snapshot_timestamp: now_ms(),
        });
        envelope.seq = Some(inner.seq);
        encode_server(&envelope).unwrap()
    }

    fn handle(&self, text: &str) -> Vec<String> {
        let envelope = decode_client(text).unwrap();
        let mut inner = self.inner.lock();
        inner.received.push(envelope.clone());

        let reply = match envelope.message {
            ClientMessage::ClockSyncRequest { client_time } => {
                ServerEnvelope::new(ServerMessage::ClockSyncResponse {
                    client_time,
                    server_time: now_ms(),
                })
            }
            ClientMessage::StateHash { hash } => {
                let ours: String = hash_state(&inner.state).into();
                if ours == hash {
                    inner.hash_matches += 1;
                    ServerEnvelope::new(ServerMessage::StateHashMatch)
                } else {
                    inner.hash_mismatches += 1;
                    ServerEnvelope::new(ServerMessage::StateMismatch { server_hash: ours })
                }
            }
            ClientMessage::RequestSnapshot => {
                drop(inner);
                return vec![self.snapshot_frame()];
            }
            ClientMessage::ToggleStep { track_id, step } => {
                let Some(track) = inner.state.track_mut(&track_id) else {
                    return Vec::new();
                };
                if track.steps.len() <= step {
                    track.steps.resize(step + 1, false);
                }
                track.steps[step] = !track.steps[step];
                let value = track.steps[step];
                inner.seq += 1;
                ServerEnvelope {
                    message: ServerMessage::StepToggled {
                        track_id,
                        step,
                        value,
                        player_id: PLAYER_ID.into(),
                    },
                    seq: Some(inner.seq),
                    client_seq: envelope.seq,
                }
            }
            ClientMessage::SetTempo { tempo } => {
                inner.state.tempo = tempo;
                inner.seq += 1;
                ServerEnvelope {
                    message: ServerMessage::TempoChanged {
                        tempo,
                        player_id: PLAYER_ID.into(),
                    },
                    seq: Some(inner.seq),
                    client_seq: envelope.seq,
                }
            }
            _ => return Vec::new(),
        };
        vec![encode_server(&reply).unwrap()]
    }

    /// Apply an edit from another player and broadcast it
    pub fn remote_step(&self, track_id: &str, step: usize, value: bool) {
        let frame = {
            let mut inner = self.inner.lock();
            if let Some(track) = inner.state.track_mut(track_id) {
                track.steps[step] = value;
            }
            inner.seq += 1;
            let envelope = ServerEnvelope {
                message: ServerMessage::StepToggled {
                    track_id: track_id.into(),
                    step,
                    value,
                    player_id: "them".into(),
                },
                seq: Some(inner.seq),
                client_seq: None,
            };
            encode_server(&envelope).unwrap()
        };
        let _ = self.remote.send(frame);
    }

    /// Close every open connection from the server side
    pub fn drop_connections(&self) {
        self.kick.notify_waiters();
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    pub fn received(&self) -> Vec<ClientEnvelope> {
        self.inner.lock().received.clone()
    }

    pub fn hash_matches(&self) -> usize {
        self.inner.lock().hash_matches
    }
}

/// The application side: a grid the engine dispatches into and reads back
#[derive(Clone, Default)]
pub struct SharedGrid {
    state: Arc<RwLock<SessionState>>,
    pub dispatched: Arc<Mutex<Vec<Action>>>,
}

impl SharedGrid {
    pub fn snapshot(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Apply a local edit the way the application would before sending it
    pub fn apply(&self, action: &Action) {
        reduce(&mut self.state.write(), action);
    }
}

impl Dispatcher for SharedGrid {
    fn dispatch(&mut self, action: Action) {
        self.apply(&action);
        self.dispatched.lock().push(action);
    }
}

impl StateSource for SharedGrid {
    fn current_state(&self) -> Option<SessionState> {
        Some(self.snapshot())
    }
}

fn reduce(state: &mut SessionState, action: &Action) {
    match action {
        Action::LoadState { state: loaded, .. } => *state = loaded.clone(),
        Action::ToggleStep { track_id, step } => {
            if let Some(track) = state.track_mut(track_id) {
                if track.steps.len() <= *step {
                    track.steps.resize(step + 1, false);
                }
                track.steps[*step] = !track.steps[*step];
            }
        }
        Action::SetStep {
            track_id,
            step,
            value,
        } => {
            if let Some(track) = state.track_mut(track_id) {
                if track.steps.len() <= *step {
                    track.steps.resize(step + 1, false);
                }
                track.steps[*step] = *value;
            }
        }
        Action::SetTempo { tempo } => state.tempo = *tempo,
        _ => {}
    }
}

pub fn one_track_session() -> SessionState {
    let mut state = SessionState::default();
    state.tracks.push(Track::new("kick", "808-kick"));
    state
}

/// Timings short enough for tests to observe several cycles
pub fn fast_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.reconnect.base_delay_ms = 50;
    config.reconnect.max_delay_ms = 200;
    config.reconnect.jitter = 0.0;
    config.reconnect.max_attempts = 50;
    config.clock_sync.interval_ms = 100;
    config.hash_check.interval_ms = 200;
    config.mutations.prune_interval_ms = 100;
    config
}

/// Poll the engine status until `predicate` holds
pub async fn wait_for_status(
    handle: &SyncHandle,
    predicate: impl Fn(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = handle.status().await.unwrap();
        if predicate(&status) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting, last status: {:?}",
            status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll an arbitrary condition until it holds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
