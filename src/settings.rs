//! Operator settings: `~/.config/pop-setup/config.toml`.
//!
//! Optional. A missing file means defaults; a file that fails to parse is an
//! error so a typo never silently changes behaviour.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding `configs/` and the scripts they reference.
    pub base_dir: Option<String>,
    /// Extra removable-volume mount points, tried after the built-in ones.
    pub usb_candidates: Vec<String>,
    /// Wait for Enter after each results table.
    pub pause_after_run: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: None,
            usb_candidates: Vec::new(),
            pause_after_run: true,
        }
    }
}

impl Settings {
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.base_dir.as_deref().map(expand_path)
    }

    pub fn usb_candidates(&self) -> Vec<PathBuf> {
        self.usb_candidates.iter().map(|p| expand_path(p)).collect()
    }
}

/// Expands shell-style paths like `~/` to absolute system paths.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pop-setup/config.toml"))
}

/// Loads settings from `path`, or the default location when `None`.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_path() {
            Some(path) => path,
            None => return Ok(Settings::default()),
        },
    };
    if !path.exists() {
        tracing::debug!("No settings at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read settings: {}", path.display()))?;
    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = load(Some(&dir.path().join("config.toml"))).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.pause_after_run);
    }

    #[test]
    fn reads_fields_and_expands_home() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "base_dir = \"/opt/pop-setup\"\nusb_candidates = [\"/mnt/usb\"]\npause_after_run = false\n",
        )
        .unwrap();

        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.base_dir(), Some(PathBuf::from("/opt/pop-setup")));
        assert_eq!(settings.usb_candidates(), vec![PathBuf::from("/mnt/usb")]);
        assert!(!settings.pause_after_run);

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/setup"), home.join("setup"));
        }
        assert_eq!(expand_path("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "base_dri = \"/typo\"\n").unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings"));
    }
}
