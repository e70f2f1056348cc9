// Session model: the shared step-sequence that every client edits
//
// These are the types carried inside snapshots and handed to the canonical
// hasher. The engine never mutates them itself; the application's reducer
// owns the live copy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Step count assumed when a track does not declare one
pub const DEFAULT_STEP_COUNT: usize = 16;

/// Hard upper bound on steps per track
pub const MAX_STEP_COUNT: usize = 128;

/// Per-step parameter override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterLock {
    /// Pitch offset in semitones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<i32>,
    /// Volume override (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// How a triggered sample plays out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Play the whole sample regardless of step length
    #[default]
    Oneshot,
    /// Cut the sample at the end of the step
    Gate,
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackMode::Oneshot => write!(f, "oneshot"),
            PlaybackMode::Gate => write!(f, "gate"),
        }
    }
}

/// One row of the sequencer grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub sample_id: String,
    #[serde(default)]
    pub steps: Vec<bool>,
    #[serde(default)]
    pub parameter_locks: Vec<Option<ParameterLock>>,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub transpose: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_mode: Option<PlaybackMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversed: Option<bool>,
    /// Local listening preference, never synchronized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    /// Local listening preference, never synchronized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soloed: Option<bool>,
}

fn default_volume() -> f64 {
    1.0
}

impl Track {
    /// Create an empty track with the default step count
    pub fn new(id: impl Into<String>, sample_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            sample_id: sample_id.into(),
            steps: vec![false; DEFAULT_STEP_COUNT],
            parameter_locks: vec![None; DEFAULT_STEP_COUNT],
            volume: default_volume(),
            transpose: 0,
            step_count: None,
            playback_mode: None,
            reversed: None,
            muted: None,
            soloed: None,
        }
    }

    /// Effective step count (declared or default)
    pub fn effective_step_count(&self) -> usize {
        self.step_count
            .unwrap_or(DEFAULT_STEP_COUNT)
            .min(MAX_STEP_COUNT)
    }

    /// Whether a step is active; steps past the array are inactive
    pub fn step(&self, step: usize) -> bool {
        self.steps.get(step).copied().unwrap_or(false)
    }

    /// Indices of all active steps within the effective step count
    pub fn active_steps(&self) -> impl Iterator<Item = usize> + '_ {
        let count = self.effective_step_count();
        self.steps
            .iter()
            .take(count)
            .enumerate()
            .filter_map(|(i, on)| on.then_some(i))
    }
}

/// Full authoritative session state, as carried in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub tracks: Vec<Track>,
    pub tempo: f64,
    #[serde(default)]
    pub swing: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Schema version, excluded from hashing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            tempo: 120.0,
            swing: 0.0,
            name: None,
            version: None,
        }
    }
}

impl SessionState {
    pub fn track(&self, track_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn track_mut(&mut self, track_id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == track_id)
    }
}

/// A connected participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Pointer position shared for presence only
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
}
