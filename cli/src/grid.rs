// Local grid: the CLI's copy of the session and its reducer
//
// The engine dispatches snapshots and remote edits into the grid and reads it
// back for hash checks. Local edits are applied here first, then handed to
// the engine.

use colored::*;
use parking_lot::RwLock;
use std::sync::Arc;
use stepsync_core::model::{DEFAULT_STEP_COUNT, MAX_STEP_COUNT};
use stepsync_core::{Action, Dispatcher, PlayerInfo, PresenceEvent, SessionState, StateSource};

#[derive(Debug, Default)]
struct GridInner {
    state: SessionState,
    players: Vec<PlayerInfo>,
    selected: Option<(String, usize)>,
    focused: Option<String>,
}

/// Shared handle to the grid; clones see the same state
#[derive(Debug, Clone, Default)]
pub struct Grid {
    inner: Arc<RwLock<GridInner>>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state.clone()
    }

    pub fn players(&self) -> Vec<PlayerInfo> {
        self.inner.read().players.clone()
    }

    pub fn apply(&self, action: &Action) {
        let mut inner = self.inner.write();
        reduce(&mut inner, action);
    }

    /// One line per track: `id  x...x...  vol`
    pub fn render(&self) -> String {
        let inner = self.inner.read();
        let state = &inner.state;
        let mut out = format!(
            "{} {:.1} bpm, swing {:.0}%\n",
            state.name.as_deref().unwrap_or("untitled").bold(),
            state.tempo,
            state.swing * 100.0
        );
        for track in &state.tracks {
            let steps: String = (0..track.effective_step_count())
                .map(|i| if track.step(i) { 'x' } else { '.' })
                .collect();
            let flags = match (track.muted, track.soloed) {
                (_, Some(true)) => " S".yellow().to_string(),
                (Some(true), _) => " M".red().to_string(),
                _ => String::new(),
            };
            out.push_str(&format!(
                "  {:<10} {} {:.2}{}\n",
                track.id.bright_cyan(),
                steps,
                track.volume,
                flags
            ));
        }
        out
    }
}

impl Dispatcher for Grid {
    fn dispatch(&mut self, action: Action) {
        self.apply(&action);
    }

    fn presence(&mut self, event: PresenceEvent) {
        let mut inner = self.inner.write();
        match event {
            PresenceEvent::PlayerJoined(player) => {
                inner.players.retain(|p| p.id != player.id);
                inner.players.push(player);
            }
            PresenceEvent::PlayerLeft { player_id } => {
                inner.players.retain(|p| p.id != player_id);
            }
            PresenceEvent::CursorMoved { .. } => {}
        }
    }
}

impl StateSource for Grid {
    fn current_state(&self) -> Option<SessionState> {
        Some(self.state())
    }
}

fn ensure_len<T: Clone>(items: &mut Vec<T>, len: usize, fill: T) {
    if items.len() < len {
        items.resize(len, fill);
    }
}

fn reduce(inner: &mut GridInner, action: &Action) {
    let state = &mut inner.state;
    match action {
        Action::ToggleStep { track_id, step } => {
            if let Some(track) = state.track_mut(track_id) {
                if *step < MAX_STEP_COUNT {
                    ensure_len(&mut track.steps, step + 1, false);
                    track.steps[*step] = !track.steps[*step];
                }
            }
        }
        Action::SetStep {
            track_id,
            step,
            value,
        } => {
            if let Some(track) = state.track_mut(track_id) {
                if *step < MAX_STEP_COUNT {
                    ensure_len(&mut track.steps, step + 1, false);
                    track.steps[*step] = *value;
                }
            }
        }
        Action::SetParameterLock {
            track_id,
            step,
            lock,
        } => {
            if let Some(track) = state.track_mut(track_id) {
                if *step < MAX_STEP_COUNT {
                    ensure_len(&mut track.parameter_locks, step + 1, None);
                    track.parameter_locks[*step] = lock.clone();
                }
            }
        }
        Action::SetTempo { tempo } => state.tempo = *tempo,
        Action::SetSwing { swing } => state.swing = *swing,
        Action::AddTrack { track } => {
            if state.track(&track.id).is_none() {
                state.tracks.push(track.clone());
            }
        }
        Action::DeleteTrack { track_id } => state.tracks.retain(|t| &t.id != track_id),
        Action::ClearTrack { track_id } => {
            if let Some(track) = state.track_mut(track_id) {
                track.steps.iter_mut().for_each(|s| *s = false);
                track.parameter_locks.iter_mut().for_each(|l| *l = None);
            }
        }
        Action::SetTrackSample {
            track_id,
            sample_id,
        } => {
            if let Some(track) = state.track_mut(track_id) {
                track.sample_id = sample_id.clone();
            }
        }
        Action::SetTrackVolume { track_id, volume } => {
            if let Some(track) = state.track_mut(track_id) {
                track.volume = *volume;
            }
        }
        Action::SetTrackTranspose {
            track_id,
            transpose,
        } => {
            if let Some(track) = state.track_mut(track_id) {
                track.transpose = *transpose;
            }
        }
        Action::SetTrackStepCount {
            track_id,
            step_count,
        } => {
            if let Some(track) = state.track_mut(track_id) {
                let count = (*step_count).clamp(1, MAX_STEP_COUNT);
                track.step_count = (count != DEFAULT_STEP_COUNT).then_some(count);
                ensure_len(&mut track.steps, count, false);
                ensure_len(&mut track.parameter_locks, count, None);
            }
        }
        Action::SetTrackPlaybackMode { track_id, mode } => {
            if let Some(track) = state.track_mut(track_id) {
                track.playback_mode = Some(*mode);
            }
        }
        Action::SetSessionName { name } => state.name = Some(name.clone()),
        Action::ToggleMute { track_id } => {
            if let Some(track) = state.track_mut(track_id) {
                track.muted = Some(!track.muted.unwrap_or(false));
            }
        }
        Action::ToggleSolo { track_id } => {
            if let Some(track) = state.track_mut(track_id) {
                track.soloed = Some(!track.soloed.unwrap_or(false));
            }
        }
        Action::ExclusiveSolo { track_id } => {
            for track in &mut state.tracks {
                track.soloed = Some(&track.id == track_id);
            }
        }
        Action::ClearSolos => {
            for track in &mut state.tracks {
                track.soloed = None;
            }
        }
        Action::SelectStep { track_id, step } => {
            inner.selected = step.map(|s| (track_id.clone(), s));
        }
        Action::FocusTrack { track_id } => inner.focused = track_id.clone(),
        Action::LoadState {
            state: loaded,
            players,
        } => {
            // Listening preferences are ours and survive the reload
            let mut next = loaded.clone();
            for track in &mut next.tracks {
                if let Some(previous) = state.track(&track.id) {
                    track.muted = previous.muted;
                    track.soloed = previous.soloed;
                }
            }
            *state = next;
            inner.players = players.clone();
        }
        Action::ResetState => {
            *state = SessionState::default();
            inner.players.clear();
            inner.selected = None;
            inner.focused = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepsync_core::{hash_state, Track};

    fn grid_with_kick() -> Grid {
        let grid = Grid::new();
        grid.apply(&Action::AddTrack {
            track: Track::new("kick", "808-kick"),
        });
        grid
    }

    #[test]
    fn test_toggle_step_flips() {
        let grid = grid_with_kick();
        let toggle = Action::ToggleStep {
            track_id: "kick".into(),
            step: 4,
        };
        grid.apply(&toggle);
        assert!(grid.state().track("kick").unwrap().step(4));
        grid.apply(&toggle);
        assert!(!grid.state().track("kick").unwrap().step(4));
    }

    #[test]
    fn test_steps_past_limit_are_ignored() {
        let grid = grid_with_kick();
        grid.apply(&Action::SetStep {
            track_id: "kick".into(),
            step: MAX_STEP_COUNT,
            value: true,
        });
        assert_eq!(grid.state().track("kick").unwrap().steps.len(), DEFAULT_STEP_COUNT);
    }

    #[test]
    fn test_mute_does_not_change_hash() {
        let grid = grid_with_kick();
        let before = hash_state(&grid.state());
        grid.apply(&Action::ToggleMute {
            track_id: "kick".into(),
        });
        assert_eq!(grid.state().track("kick").unwrap().muted, Some(true));
        assert_eq!(hash_state(&grid.state()), before);
    }

    #[test]
    fn test_load_state_keeps_local_preferences() {
        let grid = grid_with_kick();
        grid.apply(&Action::ToggleSolo {
            track_id: "kick".into(),
        });

        let mut server = SessionState::default();
        let mut kick = Track::new("kick", "808-kick");
        kick.steps[0] = true;
        server.tracks.push(kick);
        grid.apply(&Action::LoadState {
            state: server,
            players: vec![],
        });

        let kick = grid.state().track("kick").cloned().unwrap();
        assert!(kick.step(0));
        assert_eq!(kick.soloed, Some(true));
    }

    #[test]
    fn test_presence_tracks_players() {
        let mut grid = Grid::new();
        let player = PlayerInfo {
            id: "p1".into(),
            name: "Ana".into(),
            color: None,
        };
        grid.presence(PresenceEvent::PlayerJoined(player.clone()));
        grid.presence(PresenceEvent::PlayerJoined(player));
        assert_eq!(grid.players().len(), 1);
        grid.presence(PresenceEvent::PlayerLeft {
            player_id: "p1".into(),
        });
        assert!(grid.players().is_empty());
    }

    #[test]
    fn test_step_count_change_extends_steps() {
        let grid = grid_with_kick();
        grid.apply(&Action::SetTrackStepCount {
            track_id: "kick".into(),
            step_count: 32,
        });
        let kick = grid.state().track("kick").cloned().unwrap();
        assert_eq!(kick.effective_step_count(), 32);
        assert_eq!(kick.steps.len(), 32);
    }

    #[test]
    fn test_render_marks_active_steps() {
        colored::control::set_override(false);
        let grid = grid_with_kick();
        grid.apply(&Action::ToggleStep {
            track_id: "kick".into(),
            step: 0,
        });
        let out = grid.render();
        assert!(out.contains("x..............."));
    }
}
