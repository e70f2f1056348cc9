//! Canonical state hashing
//!
//! Two clients holding the same session must produce the same digest no
//! matter how their local copies drifted in shape: missing optional fields,
//! arrays longer than the step count, local listening preferences. The
//! state is first normalized into [`CanonicalState`], a fixed-field struct
//! whose serde_json encoding has a stable key order, and that encoding is
//! hashed with BLAKE3.
//!
//! The digest is for divergence detection only, not a security primitive.

use crate::model::{ParameterLock, PlaybackMode, SessionState, Track, MAX_STEP_COUNT};
use serde::Serialize;
use std::fmt;

/// Hex digest of a canonical state (first 8 bytes of BLAKE3)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateDigest(String);

impl StateDigest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<StateDigest> for String {
    fn from(digest: StateDigest) -> Self {
        digest.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalTrack {
    pub id: String,
    pub name: String,
    pub sample_id: String,
    pub step_count: usize,
    pub steps: Vec<bool>,
    pub parameter_locks: Vec<Option<ParameterLock>>,
    pub volume: f64,
    pub transpose: i32,
    pub playback_mode: PlaybackMode,
    pub reversed: bool,
}

/// Normalized session state. Excludes schema version, session name and
/// per-client mute/solo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalState {
    pub tempo: f64,
    pub swing: f64,
    pub tracks: Vec<CanonicalTrack>,
}

fn canonical_track(track: &Track) -> CanonicalTrack {
    let step_count = track.effective_step_count().min(MAX_STEP_COUNT);

    let mut steps: Vec<bool> = track.steps.iter().copied().take(step_count).collect();
    steps.resize(step_count, false);

    let mut parameter_locks: Vec<Option<ParameterLock>> =
        track.parameter_locks.iter().take(step_count).cloned().collect();
    parameter_locks.resize(step_count, None);

    CanonicalTrack {
        id: track.id.clone(),
        name: track.name.clone(),
        sample_id: track.sample_id.clone(),
        step_count,
        steps,
        parameter_locks,
        volume: track.volume,
        transpose: track.transpose,
        playback_mode: track.playback_mode.unwrap_or_default(),
        reversed: track.reversed.unwrap_or(false),
    }
}

pub fn canonicalize(state: &SessionState) -> CanonicalState {
    CanonicalState {
        tempo: state.tempo,
        swing: state.swing,
        tracks: state.tracks.iter().map(canonical_track).collect(),
    }
}

pub fn hash(canonical: &CanonicalState) -> StateDigest {
    // Serializing a struct of plain fields cannot fail
    let bytes = serde_json::to_vec(canonical).unwrap_or_default();
    let digest = blake3::hash(&bytes);
    StateDigest(digest.to_hex().as_str()[..16].to_string())
}

pub fn hash_state(state: &SessionState) -> StateDigest {
    hash(&canonicalize(state))
}
