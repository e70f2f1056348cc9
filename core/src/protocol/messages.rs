//! Session wire protocol: messages exchanged with the session server
//!
//! Messages are JSON objects tagged by `type`. Client envelopes carry an
//! optional client sequence (`seq`) and the last server sequence seen
//! (`ack`); server envelopes carry the server sequence (`seq`) and, on
//! broadcasts caused by one of our own messages, the `clientSeq` it echoes.

use crate::action::{Action, MutationKind};
use crate::model::{CursorPosition, ParameterLock, PlaybackMode, PlayerInfo, SessionState, Track};
use crate::sync::subject::{Subject, TrackField};
use serde::{Deserialize, Serialize};

/// A message from this client to the session server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    ToggleStep {
        track_id: String,
        step: usize,
    },
    SetParameterLock {
        track_id: String,
        step: usize,
        lock: Option<ParameterLock>,
    },
    SetTempo {
        tempo: f64,
    },
    SetSwing {
        swing: f64,
    },
    AddTrack {
        track: Track,
    },
    DeleteTrack {
        track_id: String,
    },
    ClearTrack {
        track_id: String,
    },
    SetTrackSample {
        track_id: String,
        sample_id: String,
    },
    SetTrackVolume {
        track_id: String,
        volume: f64,
    },
    SetTrackTranspose {
        track_id: String,
        transpose: i32,
    },
    SetTrackStepCount {
        track_id: String,
        step_count: usize,
    },
    SetTrackPlaybackMode {
        track_id: String,
        mode: PlaybackMode,
    },
    SetSessionName {
        name: String,
    },
    RequestSnapshot,
    ClockSyncRequest {
        client_time: u64,
    },
    CursorMove {
        position: CursorPosition,
    },
    StateHash {
        hash: String,
    },
}

impl ClientMessage {
    /// Mutation kind for state-changing requests, `None` for control traffic
    pub fn mutation_kind(&self) -> Option<MutationKind> {
        Some(match self {
            ClientMessage::ToggleStep { .. } => MutationKind::ToggleStep,
            ClientMessage::SetParameterLock { .. } => MutationKind::SetParameterLock,
            ClientMessage::SetTempo { .. } => MutationKind::SetTempo,
            ClientMessage::SetSwing { .. } => MutationKind::SetSwing,
            ClientMessage::AddTrack { .. } => MutationKind::AddTrack,
            ClientMessage::DeleteTrack { .. } => MutationKind::DeleteTrack,
            ClientMessage::ClearTrack { .. } => MutationKind::ClearTrack,
            ClientMessage::SetTrackSample { .. } => MutationKind::SetTrackSample,
            ClientMessage::SetTrackVolume { .. } => MutationKind::SetTrackVolume,
            ClientMessage::SetTrackTranspose { .. } => MutationKind::SetTrackTranspose,
            ClientMessage::SetTrackStepCount { .. } => MutationKind::SetTrackStepCount,
            ClientMessage::SetTrackPlaybackMode { .. } => MutationKind::SetTrackPlaybackMode,
            ClientMessage::SetSessionName { .. } => MutationKind::SetSessionName,
            ClientMessage::RequestSnapshot
            | ClientMessage::ClockSyncRequest { .. }
            | ClientMessage::CursorMove { .. }
            | ClientMessage::StateHash { .. } => return None,
        })
    }

    /// Whether this message gets a client sequence number. Clock sync,
    /// cursor telemetry and hash pings need no ordering guarantees.
    pub fn is_sequenced(&self) -> bool {
        !matches!(
            self,
            ClientMessage::ClockSyncRequest { .. }
                | ClientMessage::CursorMove { .. }
                | ClientMessage::StateHash { .. }
        )
    }

    /// Whether this message is worth keeping while offline
    pub fn is_queueable(&self) -> bool {
        self.mutation_kind().is_some()
    }

    pub fn message_type(&self) -> &'static str {
        match self.mutation_kind() {
            Some(kind) => kind.as_str(),
            None => match self {
                ClientMessage::RequestSnapshot => "request_snapshot",
                ClientMessage::ClockSyncRequest { .. } => "clock_sync_request",
                ClientMessage::CursorMove { .. } => "cursor_move",
                _ => "state_hash",
            },
        }
    }

    pub fn subject(&self) -> Option<Subject> {
        Some(match self {
            ClientMessage::ToggleStep { track_id, step } => Subject::step(track_id.as_str(), *step),
            ClientMessage::SetParameterLock { track_id, step, .. } => Subject::ParameterLock {
                track_id: track_id.clone(),
                step: *step,
            },
            ClientMessage::SetTempo { .. } => Subject::Tempo,
            ClientMessage::SetSwing { .. } => Subject::Swing,
            ClientMessage::AddTrack { track } => Subject::track(track.id.as_str()),
            ClientMessage::DeleteTrack { track_id } | ClientMessage::ClearTrack { track_id } => {
                Subject::track(track_id.as_str())
            }
            ClientMessage::SetTrackSample { track_id, .. } => {
                Subject::track_field(track_id.as_str(), TrackField::Sample)
            }
            ClientMessage::SetTrackVolume { track_id, .. } => {
                Subject::track_field(track_id.as_str(), TrackField::Volume)
            }
            ClientMessage::SetTrackTranspose { track_id, .. } => {
                Subject::track_field(track_id.as_str(), TrackField::Transpose)
            }
            ClientMessage::SetTrackStepCount { track_id, .. } => {
                Subject::track_field(track_id.as_str(), TrackField::StepCount)
            }
            ClientMessage::SetTrackPlaybackMode { track_id, .. } => {
                Subject::track_field(track_id.as_str(), TrackField::PlaybackMode)
            }
            ClientMessage::SetSessionName { .. } => Subject::SessionName,
            ClientMessage::RequestSnapshot
            | ClientMessage::ClockSyncRequest { .. }
            | ClientMessage::CursorMove { .. }
            | ClientMessage::StateHash { .. } => return None,
        })
    }

    /// Wire request for a synchronized reducer action
    pub fn from_action(action: &Action) -> Option<Self> {
        Some(match action.clone() {
            Action::ToggleStep { track_id, step } => ClientMessage::ToggleStep { track_id, step },
            Action::SetParameterLock {
                track_id,
                step,
                lock,
            } => ClientMessage::SetParameterLock {
                track_id,
                step,
                lock,
            },
            Action::SetTempo { tempo } => ClientMessage::SetTempo { tempo },
            Action::SetSwing { swing } => ClientMessage::SetSwing { swing },
            Action::AddTrack { track } => ClientMessage::AddTrack { track },
            Action::DeleteTrack { track_id } => ClientMessage::DeleteTrack { track_id },
            Action::ClearTrack { track_id } => ClientMessage::ClearTrack { track_id },
            Action::SetTrackSample {
                track_id,
                sample_id,
            } => ClientMessage::SetTrackSample {
                track_id,
                sample_id,
            },
            Action::SetTrackVolume { track_id, volume } => {
                ClientMessage::SetTrackVolume { track_id, volume }
            }
            Action::SetTrackTranspose {
                track_id,
                transpose,
            } => ClientMessage::SetTrackTranspose {
                track_id,
                transpose,
            },
            Action::SetTrackStepCount {
                track_id,
                step_count,
            } => ClientMessage::SetTrackStepCount {
                track_id,
                step_count,
            },
            Action::SetTrackPlaybackMode { track_id, mode } => {
                ClientMessage::SetTrackPlaybackMode { track_id, mode }
            }
            Action::SetSessionName { name } => ClientMessage::SetSessionName { name },
            Action::ToggleMute { .. }
            | Action::ToggleSolo { .. }
            | Action::ExclusiveSolo { .. }
            | Action::ClearSolos
            | Action::SelectStep { .. }
            | Action::FocusTrack { .. }
            | Action::LoadState { .. }
            | Action::SetStep { .. }
            | Action::ResetState => return None,
        })
    }

    /// Reducer action that re-applies this request locally
    pub fn to_action(&self) -> Option<Action> {
        Some(match self.clone() {
            ClientMessage::ToggleStep { track_id, step } => Action::ToggleStep { track_id, step },
            ClientMessage::SetParameterLock {
                track_id,
                step,
                lock,
            } => Action::SetParameterLock {
                track_id,
                step,
                lock,
            },
            ClientMessage::SetTempo { tempo } => Action::SetTempo { tempo },
            ClientMessage::SetSwing { swing } => Action::SetSwing { swing },
            ClientMessage::AddTrack { track } => Action::AddTrack { track },
            ClientMessage::DeleteTrack { track_id } => Action::DeleteTrack { track_id },
            ClientMessage::ClearTrack { track_id } => Action::ClearTrack { track_id },
            ClientMessage::SetTrackSample {
                track_id,
                sample_id,
            } => Action::SetTrackSample {
                track_id,
                sample_id,
            },
            ClientMessage::SetTrackVolume { track_id, volume } => {
                Action::SetTrackVolume { track_id, volume }
            }
            ClientMessage::SetTrackTranspose {
                track_id,
                transpose,
            } => Action::SetTrackTranspose {
                track_id,
                transpose,
            },
            ClientMessage::SetTrackStepCount {
                track_id,
                step_count,
            } => Action::SetTrackStepCount {
                track_id,
                step_count,
            },
            ClientMessage::SetTrackPlaybackMode { track_id, mode } => {
                Action::SetTrackPlaybackMode { track_id, mode }
            }
            ClientMessage::SetSessionName { name } => Action::SetSessionName { name },
            ClientMessage::RequestSnapshot
            | ClientMessage::ClockSyncRequest { .. }
            | ClientMessage::CursorMove { .. }
            | ClientMessage::StateHash { .. } => return None,
        })
    }
}

/// A message from the session server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Snapshot {
        state: SessionState,
        #[serde(default)]
        players: Vec<PlayerInfo>,
        player_id: String,
        snapshot_timestamp: u64,
    },
    StepToggled {
        track_id: String,
        step: usize,
        value: bool,
        player_id: String,
    },
    ParameterLockSet {
        track_id: String,
        step: usize,
        lock: Option<ParameterLock>,
        player_id: String,
    },
    TempoChanged {
        tempo: f64,
        player_id: String,
    },
    SwingChanged {
        swing: f64,
        player_id: String,
    },
    TrackAdded {
        track: Track,
        player_id: String,
    },
    TrackDeleted {
        track_id: String,
        player_id: String,
    },
    TrackCleared {
        track_id: String,
        player_id: String,
    },
    TrackSampleSet {
        track_id: String,
        sample_id: String,
        player_id: String,
    },
    TrackVolumeSet {
        track_id: String,
        volume: f64,
        player_id: String,
    },
    TrackTransposeSet {
        track_id: String,
        transpose: i32,
        player_id: String,
    },
    TrackStepCountSet {
        track_id: String,
        step_count: usize,
        player_id: String,
    },
    TrackPlaybackModeSet {
        track_id: String,
        mode: PlaybackMode,
        player_id: String,
    },
    SessionNameChanged {
        name: String,
        player_id: String,
    },
    PlayerJoined {
        player: PlayerInfo,
    },
    PlayerLeft {
        player_id: String,
    },
    CursorMoved {
        player_id: String,
        position: CursorPosition,
    },
    ClockSyncResponse {
        client_time: u64,
        server_time: u64,
    },
    StateHashMatch,
    StateMismatch {
        server_hash: String,
    },
    Error {
        message: String,
    },
}

/// A state-changing broadcast, decomposed for the connection manager
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast<'a> {
    pub player_id: &'a str,
    pub kind: MutationKind,
    pub subject: Subject,
    /// Reducer action that applies the broadcast with explicit values
    pub action: Action,
}

impl ServerMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Snapshot { .. } => "snapshot",
            ServerMessage::StepToggled { .. } => "step_toggled",
            ServerMessage::ParameterLockSet { .. } => "parameter_lock_set",
            ServerMessage::TempoChanged { .. } => "tempo_changed",
            ServerMessage::SwingChanged { .. } => "swing_changed",
            ServerMessage::TrackAdded { .. } => "track_added",
            ServerMessage::TrackDeleted { .. } => "track_deleted",
            ServerMessage::TrackCleared { .. } => "track_cleared",
            ServerMessage::TrackSampleSet { .. } => "track_sample_set",
            ServerMessage::TrackVolumeSet { .. } => "track_volume_set",
            ServerMessage::TrackTransposeSet { .. } => "track_transpose_set",
            ServerMessage::TrackStepCountSet { .. } => "track_step_count_set",
            ServerMessage::TrackPlaybackModeSet { .. } => "track_playback_mode_set",
            ServerMessage::SessionNameChanged { .. } => "session_name_changed",
            ServerMessage::PlayerJoined { .. } => "player_joined",
            ServerMessage::PlayerLeft { .. } => "player_left",
            ServerMessage::CursorMoved { .. } => "cursor_moved",
            ServerMessage::ClockSyncResponse { .. } => "clock_sync_response",
            ServerMessage::StateHashMatch => "state_hash_match",
            ServerMessage::StateMismatch { .. } => "state_mismatch",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// Decompose a state broadcast; `None` for everything else
    pub fn as_broadcast(&self) -> Option<Broadcast<'_>> {
        let (player_id, kind, subject, action) = match self {
            ServerMessage::StepToggled {
                track_id,
                step,
                value,
                player_id,
            } => (
                player_id,
                MutationKind::ToggleStep,
                Subject::step(track_id.as_str(), *step),
                Action::SetStep {
                    track_id: track_id.clone(),
                    step: *step,
                    value: *value,
                },
            ),
            ServerMessage::ParameterLockSet {
                track_id,
                step,
                lock,
                player_id,
            } => (
                player_id,
                MutationKind::SetParameterLock,
                Subject::ParameterLock {
                    track_id: track_id.clone(),
                    step: *step,
                },
                Action::SetParameterLock {
                    track_id: track_id.clone(),
                    step: *step,
                    lock: lock.clone(),
                },
            ),
            ServerMessage::TempoChanged { tempo, player_id } => (
                player_id,
                MutationKind::SetTempo,
                Subject::Tempo,
                Action::SetTempo { tempo: *tempo },
            ),
            ServerMessage::SwingChanged { swing, player_id } => (
                player_id,
                MutationKind::SetSwing,
                Subject::Swing,
                Action::SetSwing { swing: *swing },
            ),
            ServerMessage::TrackAdded { track, player_id } => (
                player_id,
                MutationKind::AddTrack,
                Subject::track(track.id.as_str()),
                Action::AddTrack {
                    track: track.clone(),
                },
            ),
            ServerMessage::TrackDeleted {
                track_id,
                player_id,
            } => (
                player_id,
                MutationKind::DeleteTrack,
                Subject::track(track_id.as_str()),
                Action::DeleteTrack {
                    track_id: track_id.clone(),
                },
            ),
            ServerMessage::TrackCleared {
                track_id,
                player_id,
            } => (
                player_id,
                MutationKind::ClearTrack,
                Subject::track(track_id.as_str()),
                Action::ClearTrack {
                    track_id: track_id.clone(),
                },
            ),
            ServerMessage::TrackSampleSet {
                track_id,
                sample_id,
                player_id,
            } => (
                player_id,
                MutationKind::SetTrackSample,
                Subject::track_field(track_id.as_str(), TrackField::Sample),
                Action::SetTrackSample {
                    track_id: track_id.clone(),
                    sample_id: sample_id.clone(),
                },
            ),
            ServerMessage::TrackVolumeSet {
                track_id,
                volume,
                player_id,
            } => (
                player_id,
                MutationKind::SetTrackVolume,
                Subject::track_field(track_id.as_str(), TrackField::Volume),
                Action::SetTrackVolume {
                    track_id: track_id.clone(),
                    volume: *volume,
                },
            ),
            ServerMessage::TrackTransposeSet {
                track_id,
                transpose,
                player_id,
            } => (
                player_id,
                MutationKind::SetTrackTranspose,
                Subject::track_field(track_id.as_str(), TrackField::Transpose),
                Action::SetTrackTranspose {
                    track_id: track_id.clone(),
                    transpose: *transpose,
                },
            ),
            ServerMessage::TrackStepCountSet {
                track_id,
                step_count,
                player_id,
            } => (
                player_id,
                MutationKind::SetTrackStepCount,
                Subject::track_field(track_id.as_str(), TrackField::StepCount),
                Action::SetTrackStepCount {
                    track_id: track_id.clone(),
                    step_count: *step_count,
                },
            ),
            ServerMessage::TrackPlaybackModeSet {
                track_id,
                mode,
                player_id,
            } => (
                player_id,
                MutationKind::SetTrackPlaybackMode,
                Subject::track_field(track_id.as_str(), TrackField::PlaybackMode),
                Action::SetTrackPlaybackMode {
                    track_id: track_id.clone(),
                    mode: *mode,
                },
            ),
            ServerMessage::SessionNameChanged { name, player_id } => (
                player_id,
                MutationKind::SetSessionName,
                Subject::SessionName,
                Action::SetSessionName { name: name.clone() },
            ),
            ServerMessage::Snapshot { .. }
            | ServerMessage::PlayerJoined { .. }
            | ServerMessage::PlayerLeft { .. }
            | ServerMessage::CursorMoved { .. }
            | ServerMessage::ClockSyncResponse { .. }
            | ServerMessage::StateHashMatch
            | ServerMessage::StateMismatch { .. }
            | ServerMessage::Error { .. } => return None,
        };
        Some(Broadcast {
            player_id: player_id.as_str(),
            kind,
            subject,
            action,
        })
    }
}

/// Client message plus sequencing metadata, as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnvelope {
    #[serde(flatten)]
    pub message: ClientMessage,
    /// Per-generation client sequence number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Last server sequence this client has seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl ClientEnvelope {
    pub fn unsequenced(message: ClientMessage) -> Self {
        Self {
            message,
            seq: None,
            ack: None,
        }
    }
}

/// Server message plus sequencing metadata, as received from the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    /// Server sequence number of this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Client sequence of the request that caused this broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_seq: Option<u64>,
}

impl ServerEnvelope {
    pub fn new(message: ServerMessage) -> Self {
        Self {
            message,
            seq: None,
            client_seq: None,
        }
    }
}
