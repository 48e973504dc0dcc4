//! Shared data contracts between the registry, the executor and the
//! presentation layer.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// --- Declarations ---

/// Hardware a script needs before it is worth attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareRequirement {
    Gpu,
    UsbDrive,
}

impl FromStr for HardwareRequirement {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "gpu" => Ok(Self::Gpu),
            "usb_drive" => Ok(Self::UsbDrive),
            other => Err(other.to_string()),
        }
    }
}

/// One installable unit, as declared in `scripts.yml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Install command, relative to the base directory.
    pub install: PathBuf,
    /// Optional check command, relative to the base directory.
    pub check: Option<PathBuf>,
    pub hardware: Vec<HardwareRequirement>,
}

impl ScriptDescriptor {
    pub fn requires(&self, requirement: HardwareRequirement) -> bool {
        self.hardware.contains(&requirement)
    }
}

/// A named, ordered bundle of script ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDescriptor {
    pub id: String,
    pub description: String,
    pub scripts: Vec<String>,
}

impl ProfileDescriptor {
    /// Human label used in menus and headings.
    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            &self.id
        } else {
            &self.description
        }
    }
}

// --- Results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Check,
    Install,
    Hardware,
    Other,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Check => "check",
            Phase::Install => "install",
            Phase::Hardware => "hardware",
            Phase::Other => "other",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Done,
    Run,
    Fail,
    Skip,
    Cancel,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::Done)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Ok => "OK",
            Status::Done => "DONE",
            Status::Run => "RUN",
            Status::Fail => "FAIL",
            Status::Skip => "SKIP",
            Status::Cancel => "CANCEL",
        };
        f.write_str(label)
    }
}

/// One observation of one phase of one script. Never mutated once pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub script_id: String,
    pub script_name: String,
    pub phase: Phase,
    pub status: Status,
    pub message: String,
}

impl ExecutionResult {
    pub fn new(
        script: &ScriptDescriptor,
        phase: Phase,
        status: Status,
        message: impl Into<String>,
    ) -> Self {
        Self {
            script_id: script.id.clone(),
            script_name: script.name.clone(),
            phase,
            status,
            message: message.into(),
        }
    }
}

// --- Progress ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    End,
    Skip,
    Cancel,
}

/// Transient progress notification. `index` is 1-based.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleEvent<'a> {
    pub kind: EventKind,
    pub index: usize,
    pub total: usize,
    pub script: &'a ScriptDescriptor,
    pub final_status: Option<Status>,
}
