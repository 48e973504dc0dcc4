//! External command execution.
//!
//! Scripts are resolved against the base directory and dispatched to an
//! interpreter by suffix. Exit codes are data here: nothing in this module
//! turns a failing child into an `Err`.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Captured outcome of one child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            code: 1,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Interpreter used to launch a script file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpreter {
    Python,
    Shell,
}

impl Interpreter {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => Interpreter::Python,
            _ => Interpreter::Shell,
        }
    }

    pub fn program(self) -> &'static str {
        match self {
            Interpreter::Python => "python3",
            Interpreter::Shell => "bash",
        }
    }

    pub fn command(self, script: &Path) -> Command {
        let mut cmd = Command::new(self.program());
        cmd.arg(script);
        cmd
    }
}

/// Runs a script given relative to some base directory.
pub trait CommandRunner {
    fn run(&self, relative: &Path) -> RunOutput;
}

/// Spawns real child processes with the base directory as working directory.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    base_dir: PathBuf,
}

impl ScriptRunner {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Absolute paths are kept as-is, relative ones join the base directory.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        let joined = self.base_dir.join(relative);
        joined.canonicalize().unwrap_or(joined)
    }
}

impl CommandRunner for ScriptRunner {
    fn run(&self, relative: &Path) -> RunOutput {
        let path = self.resolve(relative);
        if !path.exists() {
            warn!("Script not found: {}", path.display());
            return RunOutput::failure(format!("Script not found: {}", path.display()));
        }

        let interpreter = Interpreter::for_path(&path);
        debug!("Running {} via {}", path.display(), interpreter.program());
        let output = interpreter
            .command(&path)
            .current_dir(&self.base_dir)
            .output();

        match output {
            Ok(out) => {
                let result = RunOutput {
                    // Signal deaths carry no code; they still count as failure.
                    code: out.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                };
                debug!("{} exited with {}", path.display(), result.code);
                result
            }
            Err(e) => {
                warn!("Failed to launch {}: {}", interpreter.program(), e);
                RunOutput::failure(format!("Failed to launch {}: {}", interpreter.program(), e))
            }
        }
    }
}

/// Trimmed stderr, else trimmed stdout, else empty.
pub fn format_message(stdout: &str, stderr: &str) -> String {
    let err = stderr.trim();
    if !err.is_empty() {
        return err.to_string();
    }
    stdout.trim().to_string()
}
