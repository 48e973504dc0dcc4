use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::MultiProgress;
use pop_setup::executor::ProgressSink;
use pop_setup::settings::{self, Settings};
use pop_setup::ui::{self, InstallProgress, MenuChoice};
use pop_setup::{
    ExecutionError, ExecutionResult, Executor, InterruptChannel, InterruptSource, Registry,
    ScriptRunner, SystemProbe,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Interactive installer for workstation setup scripts")]
struct Args {
    /// Directory containing configs/ and the scripts they reference
    #[arg(short, long, global = true)]
    base_dir: Option<PathBuf>,
    /// Settings file (defaults to ~/.config/pop-setup/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Print results as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Run the given scripts in order
    Run {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Run every script in a profile
    Profile { id: String },
    /// Check the status of every script without installing
    Check,
}

enum Batch {
    Profile(String),
    Scripts(Vec<String>),
}

impl Batch {
    fn len(&self, registry: &Registry) -> usize {
        match self {
            Batch::Profile(id) => registry.profile(id).map_or(0, |p| p.scripts.len()),
            Batch::Scripts(ids) => ids.len(),
        }
    }

    fn run(
        &self,
        executor: &mut Executor<'_>,
        progress: Option<&mut dyn ProgressSink>,
        interrupts: Option<&dyn InterruptSource>,
    ) -> Result<Vec<ExecutionResult>, ExecutionError> {
        match self {
            Batch::Profile(id) => executor.run_profile(id, progress, interrupts),
            Batch::Scripts(ids) => executor.run_scripts(ids, progress, interrupts),
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}

// --- Main Execution ---

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    let settings = settings::load(args.config.as_deref())?;
    let base_dir = match args.base_dir.clone().or_else(|| settings.base_dir()) {
        Some(dir) => dir,
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };

    let registry = Registry::load(&base_dir).with_context(|| {
        format!("Failed to load configuration from {}", base_dir.display())
    })?;
    let probe = SystemProbe::new(&settings.usb_candidates());
    let mut executor = Executor::with_system(&registry, ScriptRunner::new(&base_dir), probe);

    match args.mode {
        Some(mode) => run_headless(&mut executor, mode, args.json),
        None => {
            run_menu(&mut executor, &settings)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// --- Interactive ---

fn run_menu(executor: &mut Executor<'_>, settings: &Settings) -> Result<()> {
    let registry = executor.registry();
    let mut session = Session::stdin();
    loop {
        ui::print_header(&executor.describe_hardware());
        match ui::prompt_main_menu()? {
            MenuChoice::InstallAll => {
                let Some(profile) = ui::prompt_profile(registry.profiles())? else {
                    continue;
                };
                let heading = format!("Install all ({})", profile.label());
                let batch = Batch::Profile(profile.id.clone());
                if let Some(results) = session.run(executor, &batch) {
                    ui::display_results(&results, &heading);
                    ui::print_run_summary(&results);
                    pause(settings);
                }
            }
            MenuChoice::InstallSelected => {
                let Some(ids) = ui::prompt_script_selection(registry.scripts())? else {
                    continue;
                };
                if ids.is_empty() {
                    continue;
                }
                if let Some(results) = session.run(executor, &Batch::Scripts(ids)) {
                    ui::display_results(&results, "Install selected");
                    ui::print_run_summary(&results);
                    pause(settings);
                }
            }
            MenuChoice::CheckStatus => {
                let results = executor.run_all_checks();
                ui::display_results(&results, "System status");
                ui::print_check_summary(&results);
                pause(settings);
            }
            MenuChoice::RefreshHardware => {
                executor.refresh_hardware_state();
            }
            MenuChoice::Quit => {
                println!("Goodbye.");
                return Ok(());
            }
        }
    }
}

/// Operator controls and the terminal they print to, shared by every batch
/// of one menu session.
struct Session {
    controls: InterruptChannel,
    printer: MultiProgress,
}

impl Session {
    fn stdin() -> Self {
        let printer = MultiProgress::new();
        let notify = printer.clone();
        let controls = InterruptChannel::stdin().with_notifier(move |command| {
            let _ = notify.println(ui::acknowledge(command));
        });
        Self { controls, printer }
    }

    /// Runs a batch with progress bars and operator controls on stdin.
    /// Lookup failures are reported and yield `None`.
    fn run(&mut self, executor: &mut Executor<'_>, batch: &Batch) -> Option<Vec<ExecutionResult>> {
        let total = batch.len(executor.registry());
        ui::print_controls_hint();

        let mut progress = InstallProgress::attached(&self.printer, total);
        self.controls.start();
        let outcome = batch.run(executor, Some(&mut progress), Some(&self.controls));
        if let Some(late) = self.controls.stop() {
            let _ = self.printer.println(ui::unconsumed(late));
        }
        progress.finish();

        match outcome {
            Ok(results) => Some(results),
            Err(e) => {
                eprintln!("{} {}", "❌".red(), e.to_string().red());
                None
            }
        }
    }
}

fn pause(settings: &Settings) {
    if settings.pause_after_run {
        ui::wait_for_enter();
    }
}

// --- Headless ---

fn run_headless(executor: &mut Executor<'_>, mode: Mode, json: bool) -> Result<ExitCode> {
    let check_only = matches!(mode, Mode::Check);
    let (results, heading) = match mode {
        Mode::Check => (executor.run_all_checks(), "System status".to_string()),
        Mode::Run { ids } => (
            run_plain(executor, &Batch::Scripts(ids), json)?,
            "Install selected".to_string(),
        ),
        Mode::Profile { id } => {
            let heading = match executor.registry().profile(&id) {
                Some(profile) => format!("Install all ({})", profile.label()),
                None => format!("Install all ({})", id),
            };
            (run_plain(executor, &Batch::Profile(id), json)?, heading)
        }
    };

    if json {
        ui::print_json(&results)?;
    } else {
        ui::display_results(&results, &heading);
        if check_only {
            ui::print_check_summary(&results);
        } else {
            ui::print_run_summary(&results);
        }
    }

    let (_, failures) = ui::run_summary(&results);
    Ok(if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Unattended batch: progress bars unless JSON was asked for, no controls.
fn run_plain(
    executor: &mut Executor<'_>,
    batch: &Batch,
    json: bool,
) -> Result<Vec<ExecutionResult>> {
    if json {
        return Ok(batch.run(executor, None, None)?);
    }
    let mut progress = InstallProgress::new(batch.len(executor.registry()));
    let outcome = batch.run(executor, Some(&mut progress), None);
    progress.finish();
    Ok(outcome?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn shared_flags_are_accepted_after_the_subcommand() {
        let args =
            Args::try_parse_from(["pop-setup", "check", "--base-dir", "/opt/setup", "-v"]).unwrap();
        assert_eq!(args.base_dir, Some(PathBuf::from("/opt/setup")));
        assert!(args.verbose);
        assert!(matches!(args.mode, Some(Mode::Check)));

        let args = Args::try_parse_from([
            "pop-setup", "run", "zsh", "docker", "--config", "/tmp/c.toml", "--json",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(args.json);
        match args.mode {
            Some(Mode::Run { ids }) => assert_eq!(ids, vec!["zsh", "docker"]),
            other => panic!("unexpected mode {other:?}"),
        }
    }
}
