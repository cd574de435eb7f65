//! Configuration management with XDG paths
//!
//! ~/.config/prompt-anywhere/config.json - hotkey, agent, theme
//! ~/.local/state/prompt-anywhere/       - session history

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const APP_NAME: &str = "prompt-anywhere";

/// Get config directory (~/.config/prompt-anywhere/)
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .context("Could not determine config directory")?;
    Ok(base.join(APP_NAME))
}

/// Get state directory (~/.local/state/prompt-anywhere/)
pub fn state_dir() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .context("Could not determine state directory")?;
    Ok(base.join(APP_NAME))
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Get the well-known session file path
pub fn sessions_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("sessions.json"))
}

/// Ensure all directories exist
pub fn ensure_dirs() -> Result<()> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(state_dir()?)?;
    Ok(())
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Global hotkey combination, e.g. "ctrl+alt+x"
    #[serde(default = "default_hotkey")]
    pub hotkey: String,

    /// Agent to drive by default
    #[serde(default = "default_agent")]
    pub default_agent: String,

    /// UI theme name (interpreted by the display layer only)
    #[serde(default = "default_theme")]
    pub theme: String,
}

fn default_hotkey() -> String {
    "ctrl+alt+x".into()
}
fn default_agent() -> String {
    "codex".into()
}
fn default_theme() -> String {
    "default".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hotkey: default_hotkey(),
            default_agent: default_agent(),
            theme: default_theme(),
        }
    }
}

impl Config {
    /// Load config from disk, or return defaults
    pub fn load() -> Result<Self> {
        ensure_dirs()?;
        let path = config_path()?;

        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to disk (called whenever a field changes)
    pub fn save(&self) -> Result<()> {
        ensure_dirs()?;
        let path = config_path()?;

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, &content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let cfg = Config::default();
        assert_eq!(cfg.hotkey, "ctrl+alt+x");
        assert_eq!(cfg.default_agent, "codex");
        assert_eq!(cfg.theme, "default");
    }

    #[test]
    fn test_config_roundtrip() {
        let cfg = Config {
            hotkey: "ctrl+shift+space".into(),
            default_agent: "gemini".into(),
            theme: "dark".into(),
        };

        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hotkey, "ctrl+shift+space");
        assert_eq!(back.default_agent, "gemini");
    }

    #[test]
    fn test_config_fills_missing_fields() {
        let back: Config = serde_json::from_str(r#"{"theme":"dark"}"#).unwrap();
        assert_eq!(back.hotkey, "ctrl+alt+x");
        assert_eq!(back.default_agent, "codex");
        assert_eq!(back.theme, "dark");
    }
}
