//! Terminal presentation: menus, progress bars and result tables.
//!
//! Everything that touches the terminal lives here. The executor only sees
//! this module through the [`ProgressSink`] impl on [`InstallProgress`].

use crate::controls::InterruptCommand;
use crate::executor::ProgressSink;
use crate::models::{
    EventKind, ExecutionResult, LifecycleEvent, ProfileDescriptor, ScriptDescriptor, Status,
};
use anyhow::{Context, Result};
use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use inquire::error::InquireError;
use inquire::{MultiSelect, Select, Text};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

// --- Menus ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    InstallAll,
    InstallSelected,
    CheckStatus,
    RefreshHardware,
    Quit,
}

impl MenuChoice {
    const ALL: [MenuChoice; 5] = [
        MenuChoice::InstallAll,
        MenuChoice::InstallSelected,
        MenuChoice::CheckStatus,
        MenuChoice::RefreshHardware,
        MenuChoice::Quit,
    ];
}

impl fmt::Display for MenuChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MenuChoice::InstallAll => "Install all",
            MenuChoice::InstallSelected => "Install selected",
            MenuChoice::CheckStatus => "Check system status",
            MenuChoice::RefreshHardware => "Re-detect hardware",
            MenuChoice::Quit => "Quit",
        };
        f.write_str(label)
    }
}

/// Esc, Ctrl-C and a closed terminal all mean "back out", not "crash".
fn recover<T>(result: Result<T, InquireError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
            println!("{}", "Input cancelled. Returning to menu.".yellow());
            Ok(None)
        }
        Err(e) => Err(e).context("Prompt failed"),
    }
}

pub fn print_header(hardware: &str) {
    println!("\n{}", "🐧 Pop Setup".cyan().bold());
    println!("{}", hardware.dimmed());
}

pub fn prompt_main_menu() -> Result<MenuChoice> {
    let choice = recover(Select::new("Select an option:", MenuChoice::ALL.to_vec()).prompt())?;
    Ok(choice.unwrap_or(MenuChoice::Quit))
}

struct ProfileChoice<'a>(&'a ProfileDescriptor);

impl fmt::Display for ProfileChoice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.label())
    }
}

/// The first declared profile is the default.
pub fn prompt_profile(profiles: &[ProfileDescriptor]) -> Result<Option<&ProfileDescriptor>> {
    let options = profiles.iter().map(ProfileChoice).collect();
    let picked = recover(Select::new("Select install mode:", options).prompt())?;
    Ok(picked.map(|choice| choice.0))
}

struct ScriptChoice<'a>(&'a ScriptDescriptor);

impl fmt::Display for ScriptChoice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.description.is_empty() {
            f.write_str(&self.0.name)
        } else {
            write!(f, "{} - {}", self.0.name, self.0.description)
        }
    }
}

/// Selected ids in registry order. Empty when nothing was picked.
pub fn prompt_script_selection(scripts: &[ScriptDescriptor]) -> Result<Option<Vec<String>>> {
    let options = scripts.iter().map(ScriptChoice).collect();
    let picked = recover(
        MultiSelect::new("Select scripts (space to toggle, enter to run):", options).prompt(),
    )?;
    Ok(picked.map(|choices| choices.into_iter().map(|c| c.0.id.clone()).collect()))
}

pub fn wait_for_enter() {
    let _ = Text::new("Press Enter to return to the main menu...").prompt();
}

pub fn print_controls_hint() {
    println!(
        "{}",
        "Controls active. Type 1 (skip) or 2 (cancel) and press Enter.".dimmed()
    );
}

pub fn acknowledge(command: InterruptCommand) -> String {
    match command {
        InterruptCommand::Skip => "Skip requested. Skipping the next script..."
            .yellow()
            .to_string(),
        InterruptCommand::Cancel => "Cancel requested. Stopping after the current script."
            .red()
            .to_string(),
    }
}

/// Report for a command that arrived after the last script had started.
pub fn unconsumed(command: InterruptCommand) -> String {
    let text = match command {
        InterruptCommand::Skip => "Skip request arrived after the last script; nothing left to skip.",
        InterruptCommand::Cancel => {
            "Cancel request arrived after the last script; the batch had already finished."
        }
    };
    text.yellow().to_string()
}

// --- Results ---

/// Collapses internal whitespace runs. Display only; stored messages keep theirs.
pub fn normalize_message(message: &str) -> String {
    WHITESPACE.replace_all(message.trim(), " ").into_owned()
}

fn paint(status: Status, text: &str) -> ColoredString {
    match status {
        Status::Ok | Status::Done => text.green(),
        Status::Run => text.cyan(),
        Status::Fail | Status::Cancel => text.red(),
        Status::Skip => text.yellow(),
    }
}

pub fn render_results(results: &[ExecutionResult]) -> String {
    const MIN_SCRIPT_WIDTH: usize = 24;
    let status_w = results
        .iter()
        .map(|r| r.status.to_string().len())
        .chain(["Status".len()])
        .max()
        .unwrap_or(0);
    let script_w = results
        .iter()
        .map(|r| r.script_name.chars().count())
        .chain([MIN_SCRIPT_WIDTH])
        .max()
        .unwrap_or(MIN_SCRIPT_WIDTH);
    let phase_w = results
        .iter()
        .map(|r| r.phase.to_string().len())
        .chain(["Phase".len()])
        .max()
        .unwrap_or(0);

    let mut out = format!(
        "{}\n",
        format!(
            "{:<status_w$}  {:<script_w$}  {:<phase_w$}  Details",
            "Status", "Script", "Phase"
        )
        .magenta()
        .bold()
    );
    for r in results {
        let status = format!("{:<status_w$}", r.status.to_string());
        let phase = format!("{:<phase_w$}", r.phase.to_string());
        out.push_str(&format!(
            "{}  {:<script_w$}  {}  {}\n",
            paint(r.status, &status).bold(),
            r.script_name,
            phase.cyan(),
            normalize_message(&r.message),
        ));
    }
    out
}

pub fn display_results(results: &[ExecutionResult], heading: &str) {
    println!("\n{}", heading.bold());
    println!("{}", "─".repeat(60).dimmed());
    print!("{}", render_results(results));
}

/// (successes, failures) over each script's latest result.
pub fn run_summary(results: &[ExecutionResult]) -> (usize, usize) {
    let mut latest: HashMap<&str, Status> = HashMap::new();
    for r in results {
        latest.insert(&r.script_id, r.status);
    }
    let successes = latest.values().filter(|s| s.is_success()).count();
    let failures = latest.values().filter(|s| **s == Status::Fail).count();
    (successes, failures)
}

/// (installed, missing or unknown).
pub fn check_summary(results: &[ExecutionResult]) -> (usize, usize) {
    let installed = results.iter().filter(|r| r.status == Status::Ok).count();
    (installed, results.len() - installed)
}

pub fn print_run_summary(results: &[ExecutionResult]) {
    let (ok, failed) = run_summary(results);
    println!(
        "\n{} {} success, {} failed",
        "Summary:".green().bold(),
        ok,
        failed
    );
}

pub fn print_check_summary(results: &[ExecutionResult]) {
    let (installed, missing) = check_summary(results);
    println!(
        "\n{} {} installed, {} missing/unknown",
        "System status:".green().bold(),
        installed,
        missing
    );
}

pub fn print_json(results: &[ExecutionResult]) -> Result<()> {
    let json = serde_json::to_string_pretty(results).context("Failed to serialize results")?;
    println!("{}", json);
    Ok(())
}

// --- Progress ---

/// Overall and per-script bars, driven by lifecycle events.
pub struct InstallProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    current: ProgressBar,
}

impl InstallProgress {
    pub fn new(total: usize) -> Self {
        Self::attached(&MultiProgress::new(), total)
    }

    /// Draws into an existing [`MultiProgress`], so a printer handed out
    /// earlier keeps printing above these bars.
    pub fn attached(multi: &MultiProgress, total: usize) -> Self {
        let multi = multi.clone();
        let style = ProgressStyle::with_template(
            "{msg:30} [{bar:40.cyan/blue}] {pos}/{len} {percent:>3}% [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");

        let overall = multi.add(ProgressBar::new(total as u64));
        overall.set_style(style.clone());
        overall.set_message("Overall");
        let current = multi.add(ProgressBar::new(1));
        current.set_style(style);
        current.set_message("Current script");
        Self {
            multi,
            overall,
            current,
        }
    }

    pub fn finish(self) {
        self.current.finish_and_clear();
        self.overall.finish_and_clear();
        self.multi.remove(&self.current);
        self.multi.remove(&self.overall);
    }
}

impl ProgressSink for InstallProgress {
    fn on_event(&mut self, event: &LifecycleEvent<'_>) {
        let name = &event.script.name;
        match event.kind {
            EventKind::Start => {
                self.current.set_length(1);
                self.current.set_position(0);
                self.current
                    .set_message(format!("{} ({}/{})", name, event.index, event.total));
            }
            EventKind::End => {
                self.current.set_position(1);
                self.overall.inc(1);
            }
            EventKind::Skip => {
                self.current.set_message(format!("{} skipped", name));
                self.overall.inc(1);
            }
            EventKind::Cancel => {
                self.current.set_message(format!("{} cancelled", name));
            }
        }
        if let Some(status) = event.final_status {
            let _ = self.multi.println(format!(
                "  {} {}",
                paint(status, &status.to_string()),
                name
            ));
        }
    }
}
