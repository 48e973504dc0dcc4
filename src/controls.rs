//! Operator controls during an install run.
//!
//! A background thread reads lines of operator input and parks the latest
//! recognised command in a single slot. The executor drains that slot between
//! items through [`InterruptSource`]; it never waits on the terminal itself.
//!
//! The slot holds one command. A second command typed before the first is
//! consumed replaces it.

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use std::io::{self, BufRead, BufReader, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long the reader waits for input before re-checking the stop flag.
pub const POLL_TICK: Duration = Duration::from_millis(200);
/// How long `stop()` waits for the reader to exit.
pub const STOP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCommand {
    Skip,
    Cancel,
}

/// Maps one line of operator input to a command. Unknown input is `None`.
pub fn parse_action(line: &str) -> Option<InterruptCommand> {
    match line.trim().to_lowercase().as_str() {
        "1" | "s" | "skip" => Some(InterruptCommand::Skip),
        "2" | "c" | "cancel" => Some(InterruptCommand::Cancel),
        _ => None,
    }
}

/// Where the executor polls for operator commands at each item boundary.
pub trait InterruptSource {
    /// Reads and clears the pending command. Never blocks.
    fn consume_action(&self) -> Option<InterruptCommand>;
}

/// Single-slot mailbox shared by the reader thread and the executor.
#[derive(Debug, Default)]
pub struct CommandSlot {
    pending: Mutex<Option<InterruptCommand>>,
}

impl CommandSlot {
    pub fn store(&self, command: InterruptCommand) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = Some(command);
    }

    pub fn take(&self) -> Option<InterruptCommand> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl InterruptSource for CommandSlot {
    fn consume_action(&self) -> Option<InterruptCommand> {
        self.take()
    }
}

// --- Line sources ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// Nothing arrived within the timeout.
    Idle,
    /// End of input. No further lines will arrive.
    Closed,
}

/// Line-oriented operator input with a bounded wait.
pub trait LineSource: Send {
    fn next_line(&mut self, timeout: Duration) -> LineEvent;
}

/// Lines from any buffered reader, pumped by a dedicated thread.
///
/// The pump blocks on the reader, so it is detached and outlives any single
/// listener; restarting the channel keeps reading from the same pump.
pub struct ReaderLines {
    lines: Receiver<String>,
}

impl ReaderLines {
    pub fn new<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Input read failed: {}", e);
                        return;
                    }
                }
            }
            debug!("Input reached end of stream");
        });
        Self { lines }
    }
}

impl LineSource for ReaderLines {
    fn next_line(&mut self, timeout: Duration) -> LineEvent {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => LineEvent::Line(line),
            Err(RecvTimeoutError::Timeout) => LineEvent::Idle,
            Err(RecvTimeoutError::Disconnected) => LineEvent::Closed,
        }
    }
}

/// Lines typed at the terminal, assembled from crossterm key events.
///
/// Input is only read once `event::poll` reports it ready, so a stopped
/// listener leaves nothing half-read for the next prompt.
#[derive(Debug, Default)]
pub struct TerminalLines {
    buffer: String,
}

impl LineSource for TerminalLines {
    fn next_line(&mut self, timeout: Duration) -> LineEvent {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match event::poll(remaining) {
                Ok(true) => {}
                Ok(false) => return LineEvent::Idle,
                Err(e) => {
                    warn!("Terminal poll failed: {}", e);
                    return LineEvent::Closed;
                }
            }
            let key = match event::read() {
                Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => key,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Terminal read failed: {}", e);
                    return LineEvent::Closed;
                }
            };
            match key.code {
                KeyCode::Enter => return LineEvent::Line(std::mem::take(&mut self.buffer)),
                KeyCode::Backspace => {
                    self.buffer.pop();
                }
                KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    if self.buffer.is_empty() {
                        return LineEvent::Closed;
                    }
                }
                KeyCode::Char(c) => self.buffer.push(c),
                _ => {}
            }
        }
    }
}

/// Picks the terminal reader for a TTY and a buffered pump otherwise.
pub fn stdin_source() -> Box<dyn LineSource> {
    if io::stdin().is_terminal() {
        Box::new(TerminalLines::default())
    } else {
        Box::new(ReaderLines::new(BufReader::new(io::stdin())))
    }
}

// --- Channel ---

type Notifier = Arc<dyn Fn(InterruptCommand) + Send + Sync>;
type Worker = JoinHandle<Option<Box<dyn LineSource>>>;

/// Background reader feeding a [`CommandSlot`].
pub struct InterruptChannel {
    slot: Arc<CommandSlot>,
    stop: Arc<AtomicBool>,
    source: Option<Box<dyn LineSource>>,
    worker: Option<Worker>,
    notifier: Option<Notifier>,
}

impl InterruptChannel {
    pub fn new(source: Box<dyn LineSource>) -> Self {
        Self {
            slot: Arc::default(),
            stop: Arc::new(AtomicBool::new(false)),
            source: Some(source),
            worker: None,
            notifier: None,
        }
    }

    pub fn stdin() -> Self {
        Self::new(stdin_source())
    }

    /// Called on the reader thread each time a command is recognised.
    pub fn with_notifier<F>(mut self, notify: F) -> Self
    where
        F: Fn(InterruptCommand) + Send + Sync + 'static,
    {
        self.notifier = Some(Arc::new(notify));
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Spawns the reader. No-op while one is already running or once input
    /// has ended.
    pub fn start(&mut self) {
        self.stop.store(false, Ordering::SeqCst);
        if self.is_running() {
            return;
        }
        self.reclaim();
        let Some(mut source) = self.source.take() else {
            debug!("Operator input is closed; controls stay inactive");
            return;
        };

        let slot = Arc::clone(&self.slot);
        let stop = Arc::clone(&self.stop);
        let notifier = self.notifier.clone();
        self.worker = Some(thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                match source.next_line(POLL_TICK) {
                    LineEvent::Line(line) => {
                        let Some(command) = parse_action(&line) else {
                            continue;
                        };
                        info!("Operator requested {:?}", command);
                        slot.store(command);
                        if let Some(notify) = &notifier {
                            notify(command);
                        }
                    }
                    LineEvent::Idle => {}
                    LineEvent::Closed => return None,
                }
            }
            Some(source)
        }));
        debug!("Controls started");
    }

    /// Asks the reader to exit and waits up to [`STOP_GRACE`]. A reader
    /// still mid-read is left to finish on its own.
    ///
    /// Returns a command that arrived but was never consumed, clearing the
    /// slot so it cannot leak into the next batch.
    pub fn stop(&mut self) -> Option<InterruptCommand> {
        self.stop.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + STOP_GRACE;
        while self.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        self.reclaim();
        let leftover = self.slot.take();
        if let Some(command) = leftover {
            info!("Discarding unconsumed {:?} request", command);
        }
        debug!("Controls stopped");
        leftover
    }

    /// Joins a finished reader and takes its source back for the next start.
    fn reclaim(&mut self) {
        let Some(worker) = self.worker.take_if(|w| w.is_finished()) else {
            return;
        };
        match worker.join() {
            Ok(source) => self.source = source,
            Err(_) => warn!("Controls thread panicked"),
        }
    }
}

impl InterruptSource for InterruptChannel {
    fn consume_action(&self) -> Option<InterruptCommand> {
        self.slot.take()
    }
}

impl Drop for InterruptChannel {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
