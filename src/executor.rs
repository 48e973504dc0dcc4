//! Execution core.
//!
//! Drives scripts strictly one after another: interrupt poll, hardware gate,
//! check, then install when the check did not pass. Results are appended in
//! order and never revisited. Progress goes out through [`ProgressSink`]; the
//! executor itself knows nothing about terminals.

use crate::controls::{InterruptCommand, InterruptSource};
use crate::hardware::{HardwareProbe, HardwareState, SystemProbe};
use crate::models::{
    EventKind, ExecutionResult, HardwareRequirement, LifecycleEvent, Phase, ScriptDescriptor,
    Status,
};
use crate::process::{CommandRunner, ScriptRunner, format_message};
use crate::registry::Registry;
use thiserror::Error;
use tracing::{debug, info};

pub const GPU_SKIP_REASON: &str = "Skipped: NVIDIA GPU not detected";
pub const USB_SKIP_REASON: &str = "Skipped: required USB drive not detected";

/// Lookup failures. Fatal to the whole call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Unknown script '{0}'")]
    UnknownScript(String),
    #[error("Unknown profile '{0}'")]
    UnknownProfile(String),
}

/// Receives lifecycle events while a batch runs.
pub trait ProgressSink {
    fn on_event(&mut self, event: &LifecycleEvent<'_>);
}

impl<F> ProgressSink for F
where
    F: FnMut(&LifecycleEvent<'_>),
{
    fn on_event(&mut self, event: &LifecycleEvent<'_>) {
        self(event)
    }
}

pub struct Executor<'r, R = ScriptRunner> {
    registry: &'r Registry,
    runner: R,
    probe: Box<dyn HardwareProbe>,
    hardware: Option<HardwareState>,
}

impl<'r> Executor<'r, ScriptRunner> {
    /// Executor over real processes and the live system probe.
    pub fn with_system(registry: &'r Registry, runner: ScriptRunner, probe: SystemProbe) -> Self {
        Self::new(registry, runner, Box::new(probe))
    }
}

impl<'r, R: CommandRunner> Executor<'r, R> {
    pub fn new(registry: &'r Registry, runner: R, probe: Box<dyn HardwareProbe>) -> Self {
        Self {
            registry,
            runner,
            probe,
            hardware: None,
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Cached snapshot, detected on first use.
    pub fn hardware_state(&mut self) -> &HardwareState {
        self.hardware.get_or_insert_with(|| self.probe.detect())
    }

    /// Re-detects and replaces the cached snapshot.
    pub fn refresh_hardware_state(&mut self) -> &HardwareState {
        info!("Refreshing hardware state");
        self.hardware.insert(self.probe.detect())
    }

    pub fn describe_hardware(&mut self) -> String {
        self.hardware_state().to_string()
    }

    pub fn run_profile(
        &mut self,
        profile_id: &str,
        progress: Option<&mut dyn ProgressSink>,
        interrupts: Option<&dyn InterruptSource>,
    ) -> Result<Vec<ExecutionResult>, ExecutionError> {
        let registry = self.registry;
        let profile = registry
            .profile(profile_id)
            .ok_or_else(|| ExecutionError::UnknownProfile(profile_id.to_string()))?;
        info!("Running profile '{}'", profile.id);
        self.run_scripts(&profile.scripts, progress, interrupts)
    }

    /// Runs `ids` in order. Every id is resolved before anything executes.
    pub fn run_scripts<S: AsRef<str>>(
        &mut self,
        ids: &[S],
        mut progress: Option<&mut dyn ProgressSink>,
        interrupts: Option<&dyn InterruptSource>,
    ) -> Result<Vec<ExecutionResult>, ExecutionError> {
        let registry = self.registry;
        let scripts = ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                registry
                    .script(id)
                    .ok_or_else(|| ExecutionError::UnknownScript(id.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let hardware = self.hardware_state().clone();
        let total = scripts.len();
        let mut results = Vec::new();

        for (pos, script) in scripts.into_iter().enumerate() {
            let index = pos + 1;
            let mut emit = |kind, final_status| {
                if let Some(sink) = progress.as_mut() {
                    sink.on_event(&LifecycleEvent {
                        kind,
                        index,
                        total,
                        script,
                        final_status,
                    });
                }
            };

            match interrupts.and_then(|source| source.consume_action()) {
                Some(InterruptCommand::Cancel) => {
                    info!("Cancelled at '{}' ({}/{})", script.id, index, total);
                    results.push(ExecutionResult::new(
                        script,
                        Phase::Install,
                        Status::Cancel,
                        "Install cancelled by user",
                    ));
                    emit(EventKind::Cancel, Some(Status::Cancel));
                    break;
                }
                Some(InterruptCommand::Skip) => {
                    info!("Skipped '{}' on request", script.id);
                    results.push(ExecutionResult::new(
                        script,
                        Phase::Install,
                        Status::Skip,
                        "Skipped by user",
                    ));
                    emit(EventKind::Skip, Some(Status::Skip));
                    continue;
                }
                None => {}
            }

            if let Some(reason) = hardware_skip_reason(script, &hardware) {
                debug!("'{}': {}", script.id, reason);
                results.push(ExecutionResult::new(
                    script,
                    Phase::Hardware,
                    Status::Skip,
                    reason,
                ));
                emit(EventKind::Skip, Some(Status::Skip));
                continue;
            }

            emit(EventKind::Start, None);
            let flow = self.install_flow(script);
            let final_status = flow.last().map_or(Status::Done, |r| r.status);
            results.extend(flow);
            emit(EventKind::End, Some(final_status));
        }

        Ok(results)
    }

    /// Gate and check every registered script, in load order. Never installs.
    pub fn run_all_checks(&mut self) -> Vec<ExecutionResult> {
        let hardware = self.hardware_state().clone();
        let registry = self.registry;
        registry
            .scripts()
            .iter()
            .map(|script| match hardware_skip_reason(script, &hardware) {
                Some(reason) => {
                    ExecutionResult::new(script, Phase::Hardware, Status::Skip, reason)
                }
                None => self.check(script),
            })
            .collect()
    }

    fn install_flow(&self, script: &ScriptDescriptor) -> Vec<ExecutionResult> {
        let check = self.check(script);
        if check.status == Status::Ok {
            return vec![check];
        }

        let mut results = vec![
            check,
            ExecutionResult::new(
                script,
                Phase::Install,
                Status::Run,
                "Running install script",
            ),
        ];

        let out = self.runner.run(&script.install);
        let (status, message) = if out.success() {
            let stdout = out.stdout.trim();
            let message = if stdout.is_empty() { "Completed" } else { stdout };
            (Status::Done, message.to_string())
        } else {
            (Status::Fail, format_message(&out.stdout, &out.stderr))
        };
        info!("'{}' install finished: {}", script.id, status);
        results.push(ExecutionResult::new(script, Phase::Install, status, message));
        results
    }

    fn check(&self, script: &ScriptDescriptor) -> ExecutionResult {
        let Some(check) = &script.check else {
            return ExecutionResult::new(script, Phase::Check, Status::Skip, "No check defined");
        };

        let out = self.runner.run(check);
        let status = if out.success() { Status::Ok } else { Status::Fail };
        let mut message = out.stdout.trim().to_string();
        if message.is_empty() {
            message = format_message(&out.stdout, &out.stderr);
        }
        if status == Status::Fail && message.is_empty() {
            message = "Check failed".to_string();
        }
        debug!("'{}' check: {}", script.id, status);
        ExecutionResult::new(script, Phase::Check, status, message)
    }
}

/// First unmet requirement, GPU before USB.
pub fn hardware_skip_reason(
    script: &ScriptDescriptor,
    state: &HardwareState,
) -> Option<&'static str> {
    if script.requires(HardwareRequirement::Gpu) && !state.has_gpu {
        return Some(GPU_SKIP_REASON);
    }
    if script.requires(HardwareRequirement::UsbDrive) && !state.usb_present() {
        return Some(USB_SKIP_REASON);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileDescriptor;
    use crate::process::RunOutput;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Canned outputs keyed by script path; records every call.
    #[derive(Default)]
    struct FakeRunner {
        outputs: HashMap<PathBuf, RunOutput>,
        calls: RefCell<Vec<PathBuf>>,
    }

    impl FakeRunner {
        fn with(mut self, path: &str, code: i32, stdout: &str, stderr: &str) -> Self {
            self.outputs.insert(
                PathBuf::from(path),
                RunOutput {
                    code,
                    stdout: stdout.into(),
                    stderr: stderr.into(),
                },
            );
            self
        }

        fn calls(&self) -> Vec<PathBuf> {
            self.calls.borrow().clone()
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, relative: &Path) -> RunOutput {
            self.calls.borrow_mut().push(relative.to_path_buf());
            self.outputs.get(relative).cloned().unwrap_or_else(|| {
                RunOutput::failure(format!("Script not found: {}", relative.display()))
            })
        }
    }

    struct FixedProbe {
        state: HardwareState,
        detections: Arc<AtomicUsize>,
    }

    impl FixedProbe {
        fn boxed(state: HardwareState) -> Box<Self> {
            Box::new(Self {
                state,
                detections: Arc::default(),
            })
        }
    }

    impl HardwareProbe for FixedProbe {
        fn detect(&self) -> HardwareState {
            self.detections.fetch_add(1, Ordering::SeqCst);
            self.state.clone()
        }
    }

    /// Hands out a scripted sequence of commands, one per poll.
    struct ScriptedInterrupts(RefCell<Vec<Option<InterruptCommand>>>);

    impl ScriptedInterrupts {
        fn new(mut polls: Vec<Option<InterruptCommand>>) -> Self {
            polls.reverse();
            Self(RefCell::new(polls))
        }
    }

    impl InterruptSource for ScriptedInterrupts {
        fn consume_action(&self) -> Option<InterruptCommand> {
            self.0.borrow_mut().pop().flatten()
        }
    }

    fn script(id: &str, check: Option<&str>, hardware: &[HardwareRequirement]) -> ScriptDescriptor {
        ScriptDescriptor {
            id: id.into(),
            name: id.to_uppercase(),
            description: String::new(),
            install: PathBuf::from(format!("install/{id}.sh")),
            check: check.map(PathBuf::from),
            hardware: hardware.to_vec(),
        }
    }

    fn registry(scripts: Vec<ScriptDescriptor>) -> Registry {
        let ids = scripts.iter().map(|s| s.id.clone()).collect();
        let profile = ProfileDescriptor {
            id: "all".into(),
            description: "Everything".into(),
            scripts: ids,
        };
        Registry::new(scripts, vec![profile]).unwrap()
    }

    fn summary(results: &[ExecutionResult]) -> Vec<(&str, Phase, Status, &str)> {
        results
            .iter()
            .map(|r| (r.script_id.as_str(), r.phase, r.status, r.message.as_str()))
            .collect()
    }

    fn no_hardware() -> HardwareState {
        HardwareState::default()
    }

    #[test]
    fn check_pass_skips_install_and_check_fail_installs() {
        let reg = registry(vec![
            script("a", Some("check/a.sh"), &[]),
            script("b", Some("check/b.sh"), &[]),
        ]);
        let runner = FakeRunner::default()
            .with("check/a.sh", 0, "", "")
            .with("check/b.sh", 1, "", "")
            .with("install/b.sh", 0, "ok\n", "");
        let mut exec = Executor::new(&reg, runner, FixedProbe::boxed(no_hardware()));

        let results = exec.run_scripts(&["a", "b"], None, None).unwrap();
        assert_eq!(
            summary(&results),
            vec![
                ("a", Phase::Check, Status::Ok, ""),
                ("b", Phase::Check, Status::Fail, "Check failed"),
                ("b", Phase::Install, Status::Run, "Running install script"),
                ("b", Phase::Install, Status::Done, "ok"),
            ]
        );
        assert_eq!(
            exec.runner().calls(),
            vec![
                PathBuf::from("check/a.sh"),
                PathBuf::from("check/b.sh"),
                PathBuf::from("install/b.sh"),
            ]
        );
    }

    #[test]
    fn gpu_gate_skips_without_spawning() {
        let reg = registry(vec![script("c", Some("check/c.sh"), &[HardwareRequirement::Gpu])]);
        let mut exec = Executor::new(&reg, FakeRunner::default(), FixedProbe::boxed(no_hardware()));

        let mut events = Vec::new();
        let mut sink = |e: &LifecycleEvent<'_>| events.push((e.kind, e.final_status));
        let results = exec.run_scripts(&["c"], Some(&mut sink), None).unwrap();

        assert_eq!(
            summary(&results),
            vec![("c", Phase::Hardware, Status::Skip, GPU_SKIP_REASON)]
        );
        assert!(exec.runner().calls().is_empty());
        assert_eq!(events, vec![(EventKind::Skip, Some(Status::Skip))]);
    }

    #[test]
    fn usb_gate_uses_its_own_reason() {
        let reg = registry(vec![script("u", None, &[HardwareRequirement::UsbDrive])]);
        let state = HardwareState {
            has_gpu: true,
            ..HardwareState::default()
        };
        let mut exec = Executor::new(&reg, FakeRunner::default(), FixedProbe::boxed(state));
        let results = exec.run_scripts(&["u"], None, None).unwrap();
        assert_eq!(results[0].message, USB_SKIP_REASON);
    }

    #[test]
    fn satisfied_hardware_runs_normally() {
        let reg = registry(vec![script(
            "g",
            Some("check/g.sh"),
            &[HardwareRequirement::Gpu, HardwareRequirement::UsbDrive],
        )]);
        let state = HardwareState {
            has_gpu: true,
            gpu_description: "RTX".into(),
            removable_volume: Some(PathBuf::from("/media/usb")),
        };
        let runner = FakeRunner::default().with("check/g.sh", 0, "present", "");
        let mut exec = Executor::new(&reg, runner, FixedProbe::boxed(state));
        let results = exec.run_scripts(&["g"], None, None).unwrap();
        assert_eq!(summary(&results), vec![("g", Phase::Check, Status::Ok, "present")]);
    }

    #[test]
    fn missing_install_without_check_fails_in_three_steps() {
        let mut d = script("d", None, &[]);
        d.install = PathBuf::from("/missing/x.sh");
        let reg = registry(vec![d]);
        let mut exec = Executor::new(&reg, FakeRunner::default(), FixedProbe::boxed(no_hardware()));

        let results = exec.run_scripts(&["d"], None, None).unwrap();
        assert_eq!(
            summary(&results),
            vec![
                ("d", Phase::Check, Status::Skip, "No check defined"),
                ("d", Phase::Install, Status::Run, "Running install script"),
                ("d", Phase::Install, Status::Fail, "Script not found: /missing/x.sh"),
            ]
        );
    }

    #[test]
    fn install_messages_follow_exit_code() {
        let reg = registry(vec![
            script("quiet", None, &[]),
            script("loud", None, &[]),
            script("mute", None, &[]),
        ]);
        let runner = FakeRunner::default()
            .with("install/quiet.sh", 0, "  \n", "warning only")
            .with("install/loud.sh", 2, "partial\n", "  boom \n")
            .with("install/mute.sh", 2, " stdout only ", "");
        let mut exec = Executor::new(&reg, runner, FixedProbe::boxed(no_hardware()));
        let results = exec.run_scripts(&["quiet", "loud", "mute"], None, None).unwrap();

        let finals: Vec<_> = results
            .iter()
            .filter(|r| r.phase == Phase::Install && r.status != Status::Run)
            .map(|r| (r.status, r.message.as_str()))
            .collect();
        assert_eq!(
            finals,
            vec![
                (Status::Done, "Completed"),
                (Status::Fail, "boom"),
                (Status::Fail, "stdout only"),
            ]
        );
    }

    #[test]
    fn check_message_prefers_stdout_then_stderr() {
        let reg = registry(vec![
            script("x", Some("check/x.sh"), &[]),
            script("y", Some("check/y.sh"), &[]),
        ]);
        let runner = FakeRunner::default()
            .with("check/x.sh", 0, "", "installed v2")
            .with("check/y.sh", 0, "v3\n", "noise");
        let mut exec = Executor::new(&reg, runner, FixedProbe::boxed(no_hardware()));
        let results = exec.run_all_checks();
        assert_eq!(results[0].message, "installed v2");
        assert_eq!(results[1].message, "v3");
    }

    #[test]
    fn unknown_id_aborts_before_anything_runs() {
        let reg = registry(vec![script("a", Some("check/a.sh"), &[])]);
        let mut exec = Executor::new(&reg, FakeRunner::default(), FixedProbe::boxed(no_hardware()));

        let err = exec.run_scripts(&["a", "ghost"], None, None).unwrap_err();
        assert_eq!(err, ExecutionError::UnknownScript("ghost".into()));
        assert!(exec.runner().calls().is_empty());

        let err = exec.run_profile("nope", None, None).unwrap_err();
        assert_eq!(err.to_string(), "Unknown profile 'nope'");
    }

    #[test]
    fn cancel_stops_the_batch_at_the_boundary() {
        let reg = registry(vec![
            script("a", Some("check/a.sh"), &[]),
            script("b", Some("check/b.sh"), &[]),
            script("c", Some("check/c.sh"), &[]),
        ]);
        let runner = FakeRunner::default().with("check/a.sh", 0, "", "");
        let mut exec = Executor::new(&reg, runner, FixedProbe::boxed(no_hardware()));
        let interrupts = ScriptedInterrupts::new(vec![None, Some(InterruptCommand::Cancel)]);

        let mut kinds = Vec::new();
        let mut sink = |e: &LifecycleEvent<'_>| kinds.push((e.kind, e.index, e.total));
        let results = exec
            .run_scripts(&["a", "b", "c"], Some(&mut sink), Some(&interrupts))
            .unwrap();

        assert_eq!(
            summary(&results),
            vec![
                ("a", Phase::Check, Status::Ok, ""),
                ("b", Phase::Install, Status::Cancel, "Install cancelled by user"),
            ]
        );
        assert_eq!(
            kinds,
            vec![
                (EventKind::Start, 1, 3),
                (EventKind::End, 1, 3),
                (EventKind::Cancel, 2, 3),
            ]
        );
        assert_eq!(exec.runner().calls(), vec![PathBuf::from("check/a.sh")]);
    }

    #[test]
    fn skip_applies_to_one_item_only() {
        let reg = registry(vec![
            script("a", Some("check/a.sh"), &[]),
            script("b", Some("check/b.sh"), &[]),
        ]);
        let runner = FakeRunner::default().with("check/b.sh", 0, "here", "");
        let mut exec = Executor::new(&reg, runner, FixedProbe::boxed(no_hardware()));
        let interrupts = ScriptedInterrupts::new(vec![Some(InterruptCommand::Skip)]);

        let results = exec.run_profile("all", None, Some(&interrupts)).unwrap();
        assert_eq!(
            summary(&results),
            vec![
                ("a", Phase::Install, Status::Skip, "Skipped by user"),
                ("b", Phase::Check, Status::Ok, "here"),
            ]
        );
    }

    #[test]
    fn end_event_carries_final_status() {
        let reg = registry(vec![script("f", Some("check/f.sh"), &[])]);
        let runner = FakeRunner::default()
            .with("check/f.sh", 1, "", "")
            .with("install/f.sh", 1, "", "nope");
        let mut exec = Executor::new(&reg, runner, FixedProbe::boxed(no_hardware()));

        let mut last = None;
        let mut sink = |e: &LifecycleEvent<'_>| last = Some((e.kind, e.final_status));
        exec.run_scripts(&["f"], Some(&mut sink), None).unwrap();
        assert_eq!(last, Some((EventKind::End, Some(Status::Fail))));
    }

    #[test]
    fn all_checks_gate_first_and_are_repeatable() {
        let reg = registry(vec![
            script("plain", Some("check/plain.sh"), &[]),
            script("gpu", Some("check/gpu.sh"), &[HardwareRequirement::Gpu]),
            script("bare", None, &[]),
        ]);
        let runner = FakeRunner::default().with("check/plain.sh", 1, "", "missing");
        let mut exec = Executor::new(&reg, runner, FixedProbe::boxed(no_hardware()));

        let first = exec.run_all_checks();
        let second = exec.run_all_checks();
        assert_eq!(first, second);
        assert_eq!(
            summary(&first),
            vec![
                ("plain", Phase::Check, Status::Fail, "missing"),
                ("gpu", Phase::Hardware, Status::Skip, GPU_SKIP_REASON),
                ("bare", Phase::Check, Status::Skip, "No check defined"),
            ]
        );
        // Nothing was installed, and the gated check never ran.
        assert_eq!(exec.runner().calls(), vec![PathBuf::from("check/plain.sh"); 2]);
    }

    #[test]
    fn hardware_is_detected_once_until_refreshed() {
        let reg = registry(vec![script("a", None, &[])]);
        let probe = FixedProbe::boxed(no_hardware());
        let detections = Arc::clone(&probe.detections);
        let mut exec = Executor::new(&reg, FakeRunner::default(), probe);

        exec.run_all_checks();
        exec.run_scripts(&["a"], None, None).unwrap();
        assert_eq!(
            exec.describe_hardware(),
            "No NVIDIA GPU detected; USB drive not detected"
        );
        assert_eq!(detections.load(Ordering::SeqCst), 1);
        exec.refresh_hardware_state();
        assert_eq!(detections.load(Ordering::SeqCst), 2);
    }
}
