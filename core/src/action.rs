//! Reducer actions and the collaborator traits around the local reducer
//!
//! The engine never applies actions itself. It hands them to a [`Dispatcher`]
//! (the application's reducer) and reads state back through a [`StateSource`]
//! when it needs to hash or to know what a local edit intended.

use crate::model::{CursorPosition, ParameterLock, PlaybackMode, PlayerInfo, SessionState, Track};
use std::fmt;

/// Every kind of mutation that can flow through the action pipeline.
///
/// Adding a variant forces a decision in [`crate::sync::classify::classify`]
/// because that function matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MutationKind {
    ToggleStep,
    SetParameterLock,
    SetTempo,
    SetSwing,
    AddTrack,
    DeleteTrack,
    ClearTrack,
    SetTrackSample,
    SetTrackVolume,
    SetTrackTranspose,
    SetTrackStepCount,
    SetTrackPlaybackMode,
    SetSessionName,
    ToggleMute,
    ToggleSolo,
    ExclusiveSolo,
    ClearSolos,
    SelectStep,
    FocusTrack,
    LoadState,
    SetStep,
    ResetState,
}

impl MutationKind {
    pub const ALL: [MutationKind; 22] = [
        MutationKind::ToggleStep,
        MutationKind::SetParameterLock,
        MutationKind::SetTempo,
        MutationKind::SetSwing,
        MutationKind::AddTrack,
        MutationKind::DeleteTrack,
        MutationKind::ClearTrack,
        MutationKind::SetTrackSample,
        MutationKind::SetTrackVolume,
        MutationKind::SetTrackTranspose,
        MutationKind::SetTrackStepCount,
        MutationKind::SetTrackPlaybackMode,
        MutationKind::SetSessionName,
        MutationKind::ToggleMute,
        MutationKind::ToggleSolo,
        MutationKind::ExclusiveSolo,
        MutationKind::ClearSolos,
        MutationKind::SelectStep,
        MutationKind::FocusTrack,
        MutationKind::LoadState,
        MutationKind::SetStep,
        MutationKind::ResetState,
    ];

    /// Stable snake_case name, matching the wire `type` of the request
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::ToggleStep => "toggle_step",
            MutationKind::SetParameterLock => "set_parameter_lock",
            MutationKind::SetTempo => "set_tempo",
            MutationKind::SetSwing => "set_swing",
            MutationKind::AddTrack => "add_track",
            MutationKind::DeleteTrack => "delete_track",
            MutationKind::ClearTrack => "clear_track",
            MutationKind::SetTrackSample => "set_track_sample",
            MutationKind::SetTrackVolume => "set_track_volume",
            MutationKind::SetTrackTranspose => "set_track_transpose",
            MutationKind::SetTrackStepCount => "set_track_step_count",
            MutationKind::SetTrackPlaybackMode => "set_track_playback_mode",
            MutationKind::SetSessionName => "set_session_name",
            MutationKind::ToggleMute => "toggle_mute",
            MutationKind::ToggleSolo => "toggle_solo",
            MutationKind::ExclusiveSolo => "exclusive_solo",
            MutationKind::ClearSolos => "clear_solos",
            MutationKind::SelectStep => "select_step",
            MutationKind::FocusTrack => "focus_track",
            MutationKind::LoadState => "load_state",
            MutationKind::SetStep => "set_step",
            MutationKind::ResetState => "reset_state",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action for the local reducer
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ToggleStep { track_id: String, step: usize },
    SetParameterLock { track_id: String, step: usize, lock: Option<ParameterLock> },
    SetTempo { tempo: f64 },
    SetSwing { swing: f64 },
    AddTrack { track: Track },
    DeleteTrack { track_id: String },
    ClearTrack { track_id: String },
    SetTrackSample { track_id: String, sample_id: String },
    SetTrackVolume { track_id: String, volume: f64 },
    SetTrackTranspose { track_id: String, transpose: i32 },
    SetTrackStepCount { track_id: String, step_count: usize },
    SetTrackPlaybackMode { track_id: String, mode: PlaybackMode },
    SetSessionName { name: String },
    ToggleMute { track_id: String },
    ToggleSolo { track_id: String },
    ExclusiveSolo { track_id: String },
    ClearSolos,
    SelectStep { track_id: String, step: Option<usize> },
    FocusTrack { track_id: Option<String> },
    /// Replace local state with an authoritative snapshot
    LoadState { state: SessionState, players: Vec<PlayerInfo> },
    /// Explicit-value step write, used for remote step broadcasts
    SetStep { track_id: String, step: usize, value: bool },
    ResetState,
}

impl Action {
    pub fn kind(&self) -> MutationKind {
        match self {
            Action::ToggleStep { .. } => MutationKind::ToggleStep,
            Action::SetParameterLock { .. } => MutationKind::SetParameterLock,
            Action::SetTempo { .. } => MutationKind::SetTempo,
            Action::SetSwing { .. } => MutationKind::SetSwing,
            Action::AddTrack { .. } => MutationKind::AddTrack,
            Action::DeleteTrack { .. } => MutationKind::DeleteTrack,
            Action::ClearTrack { .. } => MutationKind::ClearTrack,
            Action::SetTrackSample { .. } => MutationKind::SetTrackSample,
            Action::SetTrackVolume { .. } => MutationKind::SetTrackVolume,
            Action::SetTrackTranspose { .. } => MutationKind::SetTrackTranspose,
            Action::SetTrackStepCount { .. } => MutationKind::SetTrackStepCount,
            Action::SetTrackPlaybackMode { .. } => MutationKind::SetTrackPlaybackMode,
            Action::SetSessionName { .. } => MutationKind::SetSessionName,
            Action::ToggleMute { .. } => MutationKind::ToggleMute,
            Action::ToggleSolo { .. } => MutationKind::ToggleSolo,
            Action::ExclusiveSolo { .. } => MutationKind::ExclusiveSolo,
            Action::ClearSolos => MutationKind::ClearSolos,
            Action::SelectStep { .. } => MutationKind::SelectStep,
            Action::FocusTrack { .. } => MutationKind::FocusTrack,
            Action::LoadState { .. } => MutationKind::LoadState,
            Action::SetStep { .. } => MutationKind::SetStep,
            Action::ResetState => MutationKind::ResetState,
        }
    }
}

/// Presence updates that do not touch session state
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    PlayerJoined(PlayerInfo),
    PlayerLeft { player_id: String },
    CursorMoved { player_id: String, position: CursorPosition },
}

/// The application's reducer entry point
#[cfg_attr(test, mockall::automock)]
pub trait Dispatcher: Send {
    fn dispatch(&mut self, action: Action);

    fn presence(&mut self, _event: PresenceEvent) {}
}

/// Read access to the application's current local state
#[cfg_attr(test, mockall::automock)]
pub trait StateSource: Send {
    fn current_state(&self) -> Option<SessionState>;
}
