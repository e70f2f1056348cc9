// Mutation subjects and intended values
//
// A subject names the piece of session state a mutation targets. Two
// subjects overlap when they are equal or when one covers a whole track the
// other belongs to; overlap is what makes a remote edit supersede ours.

use crate::model::SessionState;
use std::fmt;

/// Per-track fields addressable as a single subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackField {
    Sample,
    Volume,
    Transpose,
    StepCount,
    PlaybackMode,
}

impl TrackField {
    fn as_str(&self) -> &'static str {
        match self {
            TrackField::Sample => "sample",
            TrackField::Volume => "volume",
            TrackField::Transpose => "transpose",
            TrackField::StepCount => "step_count",
            TrackField::PlaybackMode => "playback_mode",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Step { track_id: String, step: usize },
    ParameterLock { track_id: String, step: usize },
    Track { track_id: String },
    TrackField { track_id: String, field: TrackField },
    Tempo,
    Swing,
    SessionName,
}

impl Subject {
    pub fn step(track_id: impl Into<String>, step: usize) -> Self {
        Subject::Step {
            track_id: track_id.into(),
            step,
        }
    }

    pub fn track(track_id: impl Into<String>) -> Self {
        Subject::Track {
            track_id: track_id.into(),
        }
    }

    pub fn track_field(track_id: impl Into<String>, field: TrackField) -> Self {
        Subject::TrackField {
            track_id: track_id.into(),
            field,
        }
    }

    /// Track this subject belongs to, if any
    pub fn track_id(&self) -> Option<&str> {
        match self {
            Subject::Step { track_id, .. }
            | Subject::ParameterLock { track_id, .. }
            | Subject::Track { track_id }
            | Subject::TrackField { track_id, .. } => Some(track_id),
            Subject::Tempo | Subject::Swing | Subject::SessionName => None,
        }
    }

    pub fn overlaps(&self, other: &Subject) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Subject::Track { track_id }, o) | (o, Subject::Track { track_id }) => {
                o.track_id() == Some(track_id.as_str())
            }
            _ => false,
        }
    }

    /// Current value of this subject in `state`, in the same shape a
    /// mutation records as its intent. `None` when the subject has no
    /// comparable value (parameter locks) or its track is gone.
    pub fn value_in(&self, state: &SessionState) -> Option<IntendedValue> {
        match self {
            Subject::Step { track_id, step } => {
                state.track(track_id).map(|t| IntendedValue::Bool(t.step(*step)))
            }
            Subject::ParameterLock { .. } => None,
            Subject::Track { track_id } => {
                Some(IntendedValue::Present(state.track(track_id).is_some()))
            }
            Subject::TrackField { track_id, field } => {
                let track = state.track(track_id)?;
                Some(match field {
                    TrackField::Sample => IntendedValue::Text(track.sample_id.clone()),
                    TrackField::Volume => IntendedValue::Number(track.volume),
                    TrackField::Transpose => IntendedValue::Int(track.transpose as i64),
                    TrackField::StepCount => {
                        IntendedValue::Int(track.effective_step_count() as i64)
                    }
                    TrackField::PlaybackMode => {
                        IntendedValue::Text(track.playback_mode.unwrap_or_default().to_string())
                    }
                })
            }
            Subject::Tempo => Some(IntendedValue::Number(state.tempo)),
            Subject::Swing => Some(IntendedValue::Number(state.swing)),
            Subject::SessionName => state.name.clone().map(IntendedValue::Text),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Step { track_id, step } => write!(f, "{}:{}", track_id, step),
            Subject::ParameterLock { track_id, step } => write!(f, "{}:{}:lock", track_id, step),
            Subject::Track { track_id } => write!(f, "{}", track_id),
            Subject::TrackField { track_id, field } => write!(f, "{}:{}", track_id, field.as_str()),
            Subject::Tempo => write!(f, "tempo"),
            Subject::Swing => write!(f, "swing"),
            Subject::SessionName => write!(f, "session:name"),
        }
    }
}

/// The value a mutation expects its subject to end up with
#[derive(Debug, Clone, PartialEq)]
pub enum IntendedValue {
    Bool(bool),
    Number(f64),
    Int(i64),
    Text(String),
    /// Whether the subject (a track) exists
    Present(bool),
}

impl IntendedValue {
    /// Equality with a small tolerance for floating point controls
    pub fn matches(&self, other: &IntendedValue) -> bool {
        match (self, other) {
            (IntendedValue::Number(a), IntendedValue::Number(b)) => (a - b).abs() < 1e-6,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for IntendedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntendedValue::Bool(v) => write!(f, "{}", v),
            IntendedValue::Number(v) => write!(f, "{}", v),
            IntendedValue::Int(v) => write!(f, "{}", v),
            IntendedValue::Text(v) => write!(f, "{:?}", v),
            IntendedValue::Present(true) => write!(f, "present"),
            IntendedValue::Present(false) => write!(f, "absent"),
        }
    }
}
