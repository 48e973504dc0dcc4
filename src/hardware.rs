//! Hardware detection.
//!
//! GPU: `lspci` is scanned for an NVIDIA device first, `nvidia-smi -L` is
//! asked only when that is absent or inconclusive.
//! Removable volume: the first existing path from an ordered candidate list.
//!
//! A missing tool is "not detected", never an error.

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub const USB_PATH_ENV: &str = "USB_DRIVE_PATH";
pub const DEFAULT_USB_PATH: &str = "/media/Samsung_USB";

/// Point-in-time snapshot of the capabilities scripts can be gated on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareState {
    pub has_gpu: bool,
    pub gpu_description: String,
    pub removable_volume: Option<PathBuf>,
}

impl HardwareState {
    pub fn usb_present(&self) -> bool {
        self.removable_volume.is_some()
    }
}

impl fmt::Display for HardwareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.has_gpu, self.gpu_description.is_empty()) {
            (true, false) => write!(f, "NVIDIA GPU detected ({})", self.gpu_description)?,
            (true, true) => f.write_str("NVIDIA GPU detected")?,
            (false, _) => f.write_str("No NVIDIA GPU detected")?,
        }
        match &self.removable_volume {
            Some(path) => write!(f, "; USB drive mounted at {}", path.display()),
            None => f.write_str("; USB drive not detected"),
        }
    }
}

/// Source of hardware snapshots. Swapped for a fixed state in tests.
pub trait HardwareProbe: Send + Sync {
    fn detect(&self) -> HardwareState;
}

/// Runs a query tool and returns its stdout; `None` if it is missing or fails.
pub type ToolQuery = fn(program: &str, args: &[&str]) -> Option<String>;

/// Probes the live system.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    usb_candidates: Vec<PathBuf>,
    query: ToolQuery,
}

impl SystemProbe {
    /// Candidates: `$USB_DRIVE_PATH`, the built-in default, then `extra`.
    pub fn new(extra: &[PathBuf]) -> Self {
        Self::with_override(env::var(USB_PATH_ENV).ok(), extra)
    }

    /// Same ordering as [`SystemProbe::new`] with the override given directly.
    /// A blank override is ignored.
    pub fn with_override(usb_override: Option<String>, extra: &[PathBuf]) -> Self {
        let mut candidates = Vec::new();
        if let Some(path) = usb_override
            && !path.trim().is_empty()
        {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from(DEFAULT_USB_PATH));
        candidates.extend(extra.iter().cloned());
        Self::with_candidates(candidates)
    }

    /// Uses exactly `candidates`, de-duplicated by resolved path.
    pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
        Self {
            usb_candidates: dedupe_candidates(candidates),
            query: run_tool,
        }
    }

    /// Replaces the function used to call `lspci` and `nvidia-smi`.
    pub fn with_tool_query(mut self, query: ToolQuery) -> Self {
        self.query = query;
        self
    }

    pub fn usb_candidates(&self) -> &[PathBuf] {
        &self.usb_candidates
    }

    fn detect_gpu(&self) -> (bool, String) {
        let query = self.query;
        if let Some(line) = query("lspci", &[]).as_deref().and_then(scan_bus_listing) {
            return (true, line);
        }
        if let Some(line) = query("nvidia-smi", &["-L"]).as_deref().and_then(first_line) {
            return (true, line);
        }
        (false, String::new())
    }

    fn detect_usb(&self) -> Option<PathBuf> {
        self.usb_candidates.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl HardwareProbe for SystemProbe {
    fn detect(&self) -> HardwareState {
        let (has_gpu, gpu_description) = self.detect_gpu();
        let removable_volume = self.detect_usb();
        let state = HardwareState {
            has_gpu,
            gpu_description,
            removable_volume,
        };
        info!("Hardware: {}", state);
        state
    }
}

/// Runs a query tool; `None` if it is missing or exits non-zero.
fn run_tool(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output() {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            debug!("{} exited with {}", program, output.status);
            None
        }
        Err(e) => {
            debug!("{} unavailable: {}", program, e);
            None
        }
    }
}

/// First bus-listing line mentioning NVIDIA, trimmed.
pub fn scan_bus_listing(listing: &str) -> Option<String> {
    listing
        .lines()
        .find(|line| line.to_lowercase().contains("nvidia"))
        .map(|line| line.trim().to_string())
}

fn first_line(output: &str) -> Option<String> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.lines().next().map(|l| l.trim().to_string())
}

fn dedupe_candidates(candidates: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(resolve_key(candidate)))
        .collect()
}

fn resolve_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
