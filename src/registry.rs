//! Script and profile registry.
//!
//! Built once from `configs/scripts.yml` and `configs/profiles.yml` under the
//! base directory. Everything is validated up front so a loaded registry never
//! contains a profile pointing at a script that does not exist.

use crate::models::{HardwareRequirement, ProfileDescriptor, ScriptDescriptor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const SCRIPTS_FILE: &str = "configs/scripts.yml";
pub const PROFILES_FILE: &str = "configs/profiles.yml";

/// Fatal configuration problems, raised before anything executes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{kind} config not found: {}", path.display())]
    NotFound { kind: &'static str, path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("No scripts defined in {}", path.display())]
    NoScripts { path: PathBuf },

    #[error("No profiles defined in {}", path.display())]
    NoProfiles { path: PathBuf },

    #[error("Script '{id}' is defined more than once")]
    DuplicateScript { id: String },

    #[error("Script '{script}' has unknown hardware requirement '{tag}' (expected gpu or usb_drive)")]
    UnknownHardware { script: String, tag: String },

    #[error("Profile '{profile}' references unknown script '{script}'")]
    DanglingReference { profile: String, script: String },
}

// --- Raw file models ---

#[derive(Deserialize, Debug, Default)]
struct ScriptsFile {
    #[serde(default)]
    scripts: Vec<RawScript>,
}

#[derive(Deserialize, Debug)]
struct RawScript {
    id: String,
    name: Option<String>,
    #[serde(default)]
    description: String,
    script: PathBuf,
    check: Option<PathBuf>,
    #[serde(default)]
    hardware: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ProfilesFile {
    #[serde(default)]
    profiles: serde_yaml::Mapping,
}

#[derive(Deserialize, Debug, Default)]
struct RawProfile {
    #[serde(default)]
    description: String,
    #[serde(default)]
    scripts: Vec<String>,
}

/// Insertion-ordered lookup of scripts and profiles.
#[derive(Debug, Clone)]
pub struct Registry {
    scripts: Vec<ScriptDescriptor>,
    profiles: Vec<ProfileDescriptor>,
    script_index: HashMap<String, usize>,
    profile_index: HashMap<String, usize>,
}

impl Registry {
    /// Builds a registry, rejecting duplicate script ids and profiles that
    /// reference unknown scripts.
    pub fn new(
        scripts: Vec<ScriptDescriptor>,
        profiles: Vec<ProfileDescriptor>,
    ) -> Result<Self, ConfigError> {
        let mut script_index = HashMap::with_capacity(scripts.len());
        for (pos, script) in scripts.iter().enumerate() {
            if script_index.insert(script.id.clone(), pos).is_some() {
                return Err(ConfigError::DuplicateScript {
                    id: script.id.clone(),
                });
            }
        }

        let mut profile_index = HashMap::with_capacity(profiles.len());
        for (pos, profile) in profiles.iter().enumerate() {
            if let Some(missing) = profile
                .scripts
                .iter()
                .find(|id| !script_index.contains_key(id.as_str()))
            {
                return Err(ConfigError::DanglingReference {
                    profile: profile.id.clone(),
                    script: missing.clone(),
                });
            }
            profile_index.insert(profile.id.clone(), pos);
        }

        Ok(Self {
            scripts,
            profiles,
            script_index,
            profile_index,
        })
    }

    /// Loads both config documents from `<base_dir>/configs/`.
    pub fn load(base_dir: &Path) -> Result<Self, ConfigError> {
        let scripts = load_scripts(&base_dir.join(SCRIPTS_FILE))?;
        let profiles_path = base_dir.join(PROFILES_FILE);
        let profiles = load_profiles(&profiles_path)?;
        let registry = Self::new(scripts, profiles)?;
        info!(
            scripts = registry.scripts.len(),
            profiles = registry.profiles.len(),
            "Loaded registry from {}",
            base_dir.display()
        );
        Ok(registry)
    }

    pub fn script(&self, id: &str) -> Option<&ScriptDescriptor> {
        self.script_index.get(id).map(|&pos| &self.scripts[pos])
    }

    pub fn profile(&self, id: &str) -> Option<&ProfileDescriptor> {
        self.profile_index.get(id).map(|&pos| &self.profiles[pos])
    }

    /// Scripts in the order they were declared.
    pub fn scripts(&self) -> &[ScriptDescriptor] {
        &self.scripts
    }

    /// Profiles in the order they were declared.
    pub fn profiles(&self) -> &[ProfileDescriptor] {
        &self.profiles
    }
}

fn read_document(kind: &'static str, path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            kind,
            path: path.to_path_buf(),
        });
    }
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_document<T>(path: &Path, content: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    // An empty document is an empty config, not a syntax error.
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses `scripts.yml`. `name` defaults to the id.
pub fn load_scripts(path: &Path) -> Result<Vec<ScriptDescriptor>, ConfigError> {
    let content = read_document("Scripts", path)?;
    let file: ScriptsFile = parse_document(path, &content)?;

    let mut scripts = Vec::with_capacity(file.scripts.len());
    for raw in file.scripts {
        let hardware = raw
            .hardware
            .iter()
            .map(|tag| {
                tag.parse::<HardwareRequirement>()
                    .map_err(|tag| ConfigError::UnknownHardware {
                        script: raw.id.clone(),
                        tag,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        scripts.push(ScriptDescriptor {
            name: raw.name.unwrap_or_else(|| raw.id.clone()),
            id: raw.id,
            description: raw.description,
            install: raw.script,
            check: raw.check,
            hardware,
        });
    }

    if scripts.is_empty() {
        return Err(ConfigError::NoScripts {
            path: path.to_path_buf(),
        });
    }
    debug!("Parsed {} scripts from {}", scripts.len(), path.display());
    Ok(scripts)
}

/// Parses `profiles.yml`, keeping the declaration order of the mapping.
pub fn load_profiles(path: &Path) -> Result<Vec<ProfileDescriptor>, ConfigError> {
    let content = read_document("Profiles", path)?;
    let file: ProfilesFile = parse_document(path, &content)?;

    let mut profiles = Vec::with_capacity(file.profiles.len());
    for (key, value) in file.profiles {
        let id = match key {
            serde_yaml::Value::String(id) => id,
            other => serde_yaml::to_string(&other)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
        };
        let raw: RawProfile = if value.is_null() {
            RawProfile::default()
        } else {
            serde_yaml::from_value(value).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };
        profiles.push(ProfileDescriptor {
            id,
            description: raw.description,
            scripts: raw.scripts,
        });
    }

    if profiles.is_empty() {
        return Err(ConfigError::NoProfiles {
            path: path.to_path_buf(),
        });
    }
    debug!("Parsed {} profiles from {}", profiles.len(), path.display());
    Ok(profiles)
}
