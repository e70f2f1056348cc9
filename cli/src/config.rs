// Configuration management for the stepsync CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/stepsync/config.json
// - Linux: ~/.config/stepsync/config.json
// - Windows: %APPDATA%\stepsync\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use stepsync_core::SyncConfig;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8787/api/sessions";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sessions endpoint; the session id and `/ws` are appended
    pub server_url: String,

    /// Name shown to other players
    pub display_name: Option<String>,

    /// Engine tunables
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            display_name: None,
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("stepsync");
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("stepsync");
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.sync.validate().context("Invalid sync settings")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a value. Engine settings are addressed by dotted path, e.g.
    /// `sync.reconnect.max_attempts`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server_url" => {
                if !value.starts_with("ws://") && !value.starts_with("wss://") {
                    anyhow::bail!("server_url must start with ws:// or wss://");
                }
                self.server_url = value.trim_end_matches('/').to_string();
            }
            "display_name" => {
                self.display_name = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => {
                let path = key
                    .strip_prefix("sync.")
                    .with_context(|| format!("Unknown config key: {}", key))?;
                self.sync = set_sync_value(&self.sync, path, value)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "server_url" => Some(self.server_url.clone()),
            "display_name" => self.display_name.clone(),
            _ => {
                let path = key.strip_prefix("sync.")?;
                let tree = serde_json::to_value(&self.sync).ok()?;
                let value = lookup(&tree, path)?;
                Some(match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            }
        }
    }

    /// Every leaf setting as `(key, value)`
    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            ("server_url".to_string(), self.server_url.clone()),
            (
                "display_name".to_string(),
                self.display_name
                    .clone()
                    .unwrap_or_else(|| "(unset)".to_string()),
            ),
        ];
        if let Ok(Value::Object(sections)) = serde_json::to_value(&self.sync) {
            for (section, fields) in sections {
                match fields {
                    Value::Object(fields) => {
                        for (field, value) in fields {
                            entries.push((format!("sync.{}.{}", section, field), value.to_string()));
                        }
                    }
                    value => entries.push((format!("sync.{}", section), value.to_string())),
                }
            }
        }
        entries
    }
}

fn lookup<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(tree, |node, part| node.get(part))
}

fn set_sync_value(sync: &SyncConfig, path: &str, raw: &str) -> Result<SyncConfig> {
    let mut tree = serde_json::to_value(sync).context("Failed to serialize sync settings")?;
    let mut node = &mut tree;
    for part in path.split('.') {
        node = node
            .get_mut(part)
            .with_context(|| format!("Unknown config key: sync.{}", path))?;
    }
    // Accept bare numbers and booleans as JSON, anything else as a string
    *node = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    let updated: SyncConfig =
        serde_json::from_value(tree).with_context(|| format!("Invalid value for sync.{}", path))?;
    updated.validate()?;
    Ok(updated)
}
