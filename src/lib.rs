//! Pop Setup
//!
//! A menu-driven workstation provisioner. Scripts and profiles are declared in
//! YAML under `<base>/configs/`; each script is an install command plus an
//! optional check command. The executor runs them one at a time, skips those
//! whose hardware is missing, and lets the operator skip or cancel between
//! scripts while a batch is in flight.

pub mod controls;
pub mod executor;
pub mod hardware;
pub mod models;
pub mod process;
pub mod registry;
pub mod settings;
pub mod ui;

pub use controls::{InterruptChannel, InterruptCommand, InterruptSource};
pub use executor::{ExecutionError, Executor, ProgressSink};
pub use hardware::{HardwareProbe, HardwareState, SystemProbe};
pub use models::{ExecutionResult, LifecycleEvent, Phase, Status};
pub use process::{CommandRunner, ScriptRunner};
pub use registry::{ConfigError, Registry};
