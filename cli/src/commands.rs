// Interactive commands read from stdin while joined to a session

use anyhow::{bail, Context, Result};
use stepsync_core::{Action, PlaybackMode, Track};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// An edit to apply locally and send
    Edit(Action),
    Show,
    Players,
    Status,
    Retry,
    Help,
    Quit,
}

pub const HELP: &str = "\
Edits:
  toggle <track> <step>        flip a step
  tempo <bpm>                  set the tempo
  swing <0-100>                set swing in percent
  add <track> <sample>         add a track
  delete <track>               delete a track
  clear <track>                clear all steps of a track
  volume <track> <0-1>         set track volume
  transpose <track> <semis>    set track transpose
  steps <track> <count>        set the track's step count
  mode <track> oneshot|gate    set playback mode
  name <session name>          rename the session
  mute <track> / solo <track>  local listening only
Other:
  show, players, status, retry, help, quit";

fn arg<'a>(parts: &[&'a str], index: usize, usage: &str) -> Result<&'a str> {
    parts
        .get(index)
        .copied()
        .with_context(|| format!("Usage: {}", usage))
}

fn num<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .ok()
        .with_context(|| format!("Invalid {}: {}", what, raw))
}

pub fn parse(line: &str) -> Result<Command> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&verb) = parts.first() else {
        bail!("Empty command");
    };

    let command = match verb {
        "toggle" => {
            let track_id = arg(&parts, 1, "toggle <track> <step>")?;
            let step = num(arg(&parts, 2, "toggle <track> <step>")?, "step")?;
            Command::Edit(Action::ToggleStep {
                track_id: track_id.to_string(),
                step,
            })
        }
        "tempo" => {
            let tempo: f64 = num(arg(&parts, 1, "tempo <bpm>")?, "tempo")?;
            if !(20.0..=300.0).contains(&tempo) {
                bail!("Tempo must be between 20 and 300");
            }
            Command::Edit(Action::SetTempo { tempo })
        }
        "swing" => {
            let percent: f64 = num(arg(&parts, 1, "swing <0-100>")?, "swing")?;
            if !(0.0..=100.0).contains(&percent) {
                bail!("Swing must be between 0 and 100");
            }
            Command::Edit(Action::SetSwing {
                swing: percent / 100.0,
            })
        }
        "add" => {
            let track_id = arg(&parts, 1, "add <track> <sample>")?;
            let sample = arg(&parts, 2, "add <track> <sample>")?;
            Command::Edit(Action::AddTrack {
                track: Track::new(track_id, sample),
            })
        }
        "delete" => Command::Edit(Action::DeleteTrack {
            track_id: arg(&parts, 1, "delete <track>")?.to_string(),
        }),
        "clear" => Command::Edit(Action::ClearTrack {
            track_id: arg(&parts, 1, "clear <track>")?.to_string(),
        }),
        "volume" => {
            let track_id = arg(&parts, 1, "volume <track> <0-1>")?;
            let volume: f64 = num(arg(&parts, 2, "volume <track> <0-1>")?, "volume")?;
            if !(0.0..=1.0).contains(&volume) {
                bail!("Volume must be between 0 and 1");
            }
            Command::Edit(Action::SetTrackVolume {
                track_id: track_id.to_string(),
                volume,
            })
        }
        "transpose" => {
            let track_id = arg(&parts, 1, "transpose <track> <semis>")?;
            let transpose = num(arg(&parts, 2, "transpose <track> <semis>")?, "transpose")?;
            Command::Edit(Action::SetTrackTranspose {
                track_id: track_id.to_string(),
                transpose,
            })
        }
        "steps" => {
            let track_id = arg(&parts, 1, "steps <track> <count>")?;
            let step_count = num(arg(&parts, 2, "steps <track> <count>")?, "step count")?;
            Command::Edit(Action::SetTrackStepCount {
                track_id: track_id.to_string(),
                step_count,
            })
        }
        "mode" => {
            let track_id = arg(&parts, 1, "mode <track> oneshot|gate")?;
            let mode = match arg(&parts, 2, "mode <track> oneshot|gate")? {
                "oneshot" => PlaybackMode::Oneshot,
                "gate" => PlaybackMode::Gate,
                other => bail!("Unknown playback mode: {}", other),
            };
            Command::Edit(Action::SetTrackPlaybackMode {
                track_id: track_id.to_string(),
                mode,
            })
        }
        "name" => {
            if parts.len() < 2 {
                bail!("Usage: name <session name>");
            }
            Command::Edit(Action::SetSessionName {
                name: parts[1..].join(" "),
            })
        }
        "mute" => Command::Edit(Action::ToggleMute {
            track_id: arg(&parts, 1, "mute <track>")?.to_string(),
        }),
        "solo" => Command::Edit(Action::ToggleSolo {
            track_id: arg(&parts, 1, "solo <track>")?.to_string(),
        }),
        "show" => Command::Show,
        "players" => Command::Players,
        "status" => Command::Status,
        "retry" => Command::Retry,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("Unknown command: {} (try help)", other),
    };
    Ok(command)
}
