// Confirmed state: what the server has told us, and nothing else
//
// Built only from snapshots and broadcasts, never from optimistic local
// edits, so it is a baseline to check the next snapshot against.

use crate::action::Action;
use crate::model::SessionState;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Regression {
    /// A track the server confirmed is missing from the snapshot
    MissingTrack { track_id: String },
    /// A step the server confirmed has the opposite value in the snapshot
    StepMismatch {
        track_id: String,
        step: usize,
        expected: bool,
    },
}

impl fmt::Display for Regression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regression::MissingTrack { track_id } => write!(f, "track {} missing", track_id),
            Regression::StepMismatch {
                track_id,
                step,
                expected,
            } => write!(f, "step {}:{} expected {}", track_id, step, expected),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmedState {
    /// Track id -> active steps; `None` until the first snapshot
    tracks: Option<BTreeMap<String, BTreeSet<usize>>>,
}

impl ConfirmedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.tracks.is_some()
    }

    pub fn reset_from(&mut self, state: &SessionState) {
        let tracks = state
            .tracks
            .iter()
            .map(|t| (t.id.clone(), t.active_steps().collect()))
            .collect();
        self.tracks = Some(tracks);
    }

    /// Fold a server broadcast into the baseline
    pub fn apply(&mut self, action: &Action) {
        let Some(tracks) = self.tracks.as_mut() else {
            return;
        };
        match action {
            Action::SetStep {
                track_id,
                step,
                value,
            } => {
                if let Some(steps) = tracks.get_mut(track_id) {
                    if *value {
                        steps.insert(*step);
                    } else {
                        steps.remove(step);
                    }
                }
            }
            Action::AddTrack { track } => {
                tracks.insert(track.id.clone(), track.active_steps().collect());
            }
            Action::DeleteTrack { track_id } => {
                tracks.remove(track_id);
            }
            Action::ClearTrack { track_id } => {
                if let Some(steps) = tracks.get_mut(track_id) {
                    steps.clear();
                }
            }
            _ => {}
        }
    }

    /// Everything the server confirmed that `snapshot` no longer has
    pub fn find_regressions(&self, snapshot: &SessionState) -> Vec<Regression> {
        let Some(tracks) = self.tracks.as_ref() else {
            return Vec::new();
        };
        let mut regressions = Vec::new();
        for (track_id, confirmed_steps) in tracks {
            let Some(track) = snapshot.track(track_id) else {
                regressions.push(Regression::MissingTrack {
                    track_id: track_id.clone(),
                });
                continue;
            };
            let snapshot_steps: BTreeSet<usize> = track.active_steps().collect();
            for step in confirmed_steps.symmetric_difference(&snapshot_steps) {
                regressions.push(Regression::StepMismatch {
                    track_id: track_id.clone(),
                    step: *step,
                    expected: confirmed_steps.contains(step),
                });
            }
        }
        regressions
    }

    pub fn reset(&mut self) {
        self.tracks = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Track;

    fn state(tracks: Vec<(&str, Vec<usize>)>) -> SessionState {
        let tracks = tracks
            .into_iter()
            .map(|(id, active)| {
                let mut track = Track::new(id, "s");
                for step in active {
                    track.steps[step] = true;
                }
                track
            })
            .collect();
        SessionState {
            tracks,
            ..SessionState::default()
        }
    }

    #[test]
    fn test_uninitialized_reports_nothing() {
        let confirmed = ConfirmedState::new();
        assert!(confirmed.find_regressions(&state(vec![])).is_empty());
    }

    #[test]
    fn test_consistent_snapshot_is_clean() {
        let mut confirmed = ConfirmedState::new();
        confirmed.reset_from(&state(vec![("kick", vec![0, 4])]));
        confirmed.apply(&Action::SetStep {
            track_id: "kick".into(),
            step: 8,
            value: true,
        });
        let snapshot = state(vec![("kick", vec![0, 4, 8]), ("hat", vec![1])]);
        assert!(confirmed.find_regressions(&snapshot).is_empty());
    }

    #[test]
    fn test_detects_lost_step_and_track() {
        let mut confirmed = ConfirmedState::new();
        confirmed.reset_from(&state(vec![("kick", vec![0])]));
        confirmed.apply(&Action::AddTrack {
            track: Track::new("snare", "s"),
        });

        let regressions = confirmed.find_regressions(&state(vec![("kick", vec![])]));
        assert_eq!(regressions.len(), 2);
        assert!(regressions.contains(&Regression::StepMismatch {
            track_id: "kick".into(),
            step: 0,
            expected: true
        }));
        assert!(regressions.contains(&Regression::MissingTrack {
            track_id: "snare".into()
        }));
    }

    #[test]
    fn test_delete_and_clear() {
        let mut confirmed = ConfirmedState::new();
        confirmed.reset_from(&state(vec![("kick", vec![0]), ("hat", vec![2])]));
        confirmed.apply(&Action::DeleteTrack {
            track_id: "kick".into(),
        });
        confirmed.apply(&Action::ClearTrack {
            track_id: "hat".into(),
        });
        assert!(confirmed.find_regressions(&state(vec![("hat", vec![])])).is_empty());
    }
}
