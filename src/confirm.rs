//! Confirmation surface state machine
//!
//! Holds the single in-flight resolved command and walks it through
//! `Idle -> Presenting -> {Editing, Executing} -> Resolved -> Idle`. All
//! timing (auto-run countdown, double-confirm window, success auto-dismiss)
//! is driven by one recurring tick source; the tick handler alone decides
//! whether a countdown also triggers a run. The async loop at the bottom
//! owns the tick interval and offloads execution to a blocking task.

use crate::config::ExecutionOptions;
use crate::generator::UNSAFE_SENTINEL;
use crate::runner::{CommandRunner, ExecError};
use chrono::{DateTime, Local};
use flume::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tick cadence for all surface timers
pub const TICK_INTERVAL_MS: u64 = 50;
/// Two confirm-key presses within this window count as one confirmation
pub const DOUBLE_PRESS_WINDOW_MS: u64 = 800;
/// Successful results dismiss themselves after this long
pub const SUCCESS_DISMISS_MS: u64 = 1000;

/// Where a resolved command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// Matched a registered trigger phrase
    Matched,
    /// Produced by the LLM fallback; never auto-runs
    Generated,
}

/// The command text about to be presented and possibly executed.
/// Options are an owned copy taken at resolution time.
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub source: CommandSource,
    pub command_text: String,
    pub spoken_text: String,
    pub options: ExecutionOptions,
}

/// Outcome record emitted exactly once per completed execution attempt
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub timestamp: DateTime<Local>,
    pub command_text: String,
    pub spoken_text: String,
    pub output: String,
    pub is_error: bool,
    pub opened_in_window: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Presenting,
    Editing,
    Executing,
    Resolved { error: bool },
}

/// User gestures arriving from the host surface
#[derive(Debug, Clone)]
pub enum ConfirmInput {
    /// One press of the designated confirm key (double-press gesture)
    ConfirmPress,
    /// Immediate single-action confirm (button or modifier shortcut)
    Confirm,
    /// Switch to editing the command text
    Edit,
    /// Replace the edited text while editing
    EditedText(String),
    /// Interaction outside the primary controls; toggles the countdown pause
    BackgroundPress,
    /// Discard the presentation (also dismisses a resolved view)
    Cancel,
}

/// Presentation lifecycle signals for the host windowing layer
#[derive(Debug, Clone)]
pub enum SurfaceEvent {
    Presented {
        command_text: String,
        spoken_text: String,
        source: CommandSource,
        countdown_ms: Option<u64>,
    },
    Countdown {
        remaining_ms: u64,
        total_ms: u64,
    },
    PauseChanged(bool),
    EditBegan {
        text: String,
    },
    Executing,
    Completed {
        output: String,
        is_error: bool,
    },
    /// Error detail view; stays open until dismissed
    Expanded,
    Dismissed,
    Notice(String),
}

/// What the driver must execute on behalf of the state machine
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub command_text: String,
    pub spoken_text: String,
    pub options: ExecutionOptions,
}

/// Execution outcome delivered back to the state machine
#[derive(Debug)]
pub struct ExecOutcome {
    pub request: RunRequest,
    pub result: Result<String, ExecError>,
}

/// Auto-run configuration snapshot taken at construction
#[derive(Debug, Clone, Copy)]
pub struct ConfirmSettings {
    pub auto_run: bool,
    pub auto_run_seconds: u32,
}

pub struct ConfirmController {
    settings: ConfirmSettings,
    phase: Phase,
    current: Option<ResolvedCommand>,
    edited_text: Option<String>,
    paused: bool,
    countdown_ms: Option<u64>,
    countdown_total_ms: u64,
    double_press_ms: Option<u64>,
    dismiss_ms: Option<u64>,
    /// A result or validation status is showing for this presentation
    has_status: bool,
    surface_tx: Sender<SurfaceEvent>,
    result_tx: Sender<ExecutionResult>,
}

impl ConfirmController {
    pub fn new(
        settings: ConfirmSettings,
        surface_tx: Sender<SurfaceEvent>,
        result_tx: Sender<ExecutionResult>,
    ) -> Self {
        Self {
            settings,
            phase: Phase::Idle,
            current: None,
            edited_text: None,
            paused: false,
            countdown_ms: None,
            countdown_total_ms: 0,
            double_press_ms: None,
            dismiss_ms: None,
            has_status: false,
            surface_tx,
            result_tx,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn countdown_remaining_ms(&self) -> Option<u64> {
        self.countdown_ms
    }

    /// Present a newly resolved command, replacing whatever is currently
    /// held. Valid from any phase except `Executing`: replacing a live
    /// presentation follows the replace-immediately policy, while a show
    /// during execution is dropped so the pending result stays tied to the
    /// command that produced it.
    pub fn show(&mut self, command: ResolvedCommand) {
        if self.phase == Phase::Executing {
            warn!("dropping show request while a command is executing");
            return;
        }

        self.reset_presentation();

        let countdown = if command.source == CommandSource::Matched
            && self.settings.auto_run
            && self.settings.auto_run_seconds > 0
        {
            Some(u64::from(self.settings.auto_run_seconds) * 1000)
        } else {
            None
        };
        self.countdown_ms = countdown;
        self.countdown_total_ms = countdown.unwrap_or(0);
        self.phase = Phase::Presenting;

        debug!(
            command = %command.command_text,
            source = ?command.source,
            countdown_ms = ?countdown,
            "presenting command"
        );
        let _ = self.surface_tx.send(SurfaceEvent::Presented {
            command_text: command.command_text.clone(),
            spoken_text: command.spoken_text.clone(),
            source: command.source,
            countdown_ms: countdown,
        });
        self.current = Some(command);
    }

    /// Apply one user gesture; returns an execution request when the gesture
    /// (or its second half) confirmed the command.
    pub fn handle(&mut self, input: ConfirmInput) -> Option<RunRequest> {
        match input {
            ConfirmInput::Confirm => self.run(),
            ConfirmInput::ConfirmPress => {
                if !matches!(self.phase, Phase::Presenting | Phase::Editing) {
                    return None;
                }
                if self.double_press_ms.take().is_some() {
                    self.run()
                } else {
                    self.double_press_ms = Some(DOUBLE_PRESS_WINDOW_MS);
                    None
                }
            }
            ConfirmInput::Edit => {
                self.edit();
                None
            }
            ConfirmInput::EditedText(text) => {
                if self.phase == Phase::Editing {
                    self.edited_text = Some(text);
                }
                None
            }
            ConfirmInput::BackgroundPress => {
                self.toggle_pause();
                None
            }
            ConfirmInput::Cancel => {
                self.cancel();
                None
            }
        }
    }

    /// Advance all live timers by one tick. Returns an execution request
    /// when the auto-run countdown completes.
    pub fn tick(&mut self) -> Option<RunRequest> {
        if let Some(remaining) = self.double_press_ms {
            let next = remaining.saturating_sub(TICK_INTERVAL_MS);
            // an expired first press resets silently with no side effect
            self.double_press_ms = if next == 0 { None } else { Some(next) };
        }

        if let Some(remaining) = self.dismiss_ms {
            let next = remaining.saturating_sub(TICK_INTERVAL_MS);
            if next == 0 {
                self.dismiss_ms = None;
                if matches!(self.phase, Phase::Resolved { error: false }) {
                    self.dismiss();
                }
            } else {
                self.dismiss_ms = Some(next);
            }
        }

        if self.phase != Phase::Presenting || self.paused || self.has_status {
            return None;
        }
        let remaining = self.countdown_ms?;
        let next = remaining.saturating_sub(TICK_INTERVAL_MS);
        self.countdown_ms = Some(next);
        let _ = self.surface_tx.send(SurfaceEvent::Countdown {
            remaining_ms: next,
            total_ms: self.countdown_total_ms,
        });
        if next == 0 && self.countdown_total_ms > 0 {
            self.countdown_ms = None;
            debug!("auto-run countdown elapsed");
            return self.run();
        }
        None
    }

    /// Record the outcome of the in-flight execution
    pub fn execution_finished(&mut self, outcome: ExecOutcome) {
        if self.phase != Phase::Executing {
            warn!("execution outcome arrived outside Executing");
        }

        let ExecOutcome { request, result } = outcome;
        let (output, is_error) = match result {
            Ok(output) => (output, false),
            Err(err) => (err.into_output(), true),
        };
        let opened_in_window = !request.options.silent && !is_error;

        let record = ExecutionResult {
            timestamp: Local::now(),
            command_text: request.command_text,
            spoken_text: request.spoken_text,
            output: output.clone(),
            is_error,
            opened_in_window,
        };
        let _ = self.result_tx.send(record);

        self.has_status = true;
        self.phase = Phase::Resolved { error: is_error };
        let _ = self.surface_tx.send(SurfaceEvent::Completed {
            output,
            is_error,
        });
        if is_error {
            // stays visible until the user dismisses it
            let _ = self.surface_tx.send(SurfaceEvent::Expanded);
        } else {
            self.dismiss_ms = Some(SUCCESS_DISMISS_MS);
        }
    }

    fn reset_presentation(&mut self) {
        self.current = None;
        self.edited_text = None;
        self.paused = false;
        self.countdown_ms = None;
        self.countdown_total_ms = 0;
        self.double_press_ms = None;
        self.dismiss_ms = None;
        self.has_status = false;
    }

    fn dismiss(&mut self) {
        self.reset_presentation();
        self.phase = Phase::Idle;
        let _ = self.surface_tx.send(SurfaceEvent::Dismissed);
    }

    fn cancel(&mut self) {
        if self.phase == Phase::Executing {
            debug!("cancel ignored while executing");
            return;
        }
        if self.phase == Phase::Idle {
            return;
        }
        self.dismiss();
    }

    fn edit(&mut self) {
        if self.phase != Phase::Presenting {
            return;
        }
        // the countdown is discarded entirely, not paused
        self.countdown_ms = None;
        self.countdown_total_ms = 0;
        self.paused = false;
        self.double_press_ms = None;
        self.has_status = false;
        self.phase = Phase::Editing;

        let text = self
            .current
            .as_ref()
            .map(|c| c.command_text.clone())
            .unwrap_or_default();
        self.edited_text = Some(text.clone());
        let _ = self.surface_tx.send(SurfaceEvent::EditBegan { text });
    }

    fn toggle_pause(&mut self) {
        if self.phase != Phase::Presenting {
            return;
        }
        if self.countdown_ms.is_none() && !self.paused {
            return;
        }
        self.paused = !self.paused;
        let _ = self.surface_tx.send(SurfaceEvent::PauseChanged(self.paused));
    }

    fn run(&mut self) -> Option<RunRequest> {
        if self.phase == Phase::Executing {
            debug!("run ignored: already executing");
            return None;
        }
        if !matches!(self.phase, Phase::Presenting | Phase::Editing) {
            return None;
        }
        let current = self.current.as_ref()?;

        let command_text = if self.phase == Phase::Editing {
            self.edited_text
                .clone()
                .unwrap_or_else(|| current.command_text.clone())
        } else {
            current.command_text.clone()
        };

        let trimmed = command_text.trim();
        if trimmed.is_empty() || trimmed == UNSAFE_SENTINEL {
            // unreachable given resolution preconditions, guarded anyway
            warn!("refusing to execute empty or rejected command text");
            self.countdown_ms = None;
            self.double_press_ms = None;
            self.has_status = true;
            let _ = self.surface_tx.send(SurfaceEvent::Notice(
                "Nothing to execute: the command text is empty".to_string(),
            ));
            return None;
        }

        self.countdown_ms = None;
        self.double_press_ms = None;
        self.paused = false;
        self.phase = Phase::Executing;
        let _ = self.surface_tx.send(SurfaceEvent::Executing);

        Some(RunRequest {
            command_text: trimmed.to_string(),
            spoken_text: current.spoken_text.clone(),
            options: current.options.clone(),
        })
    }
}

// ============================================================================
// Async driver
// ============================================================================

/// Drive the controller from its channels: newly resolved commands, user
/// gestures, execution outcomes, and the recurring tick. Execution runs on
/// the blocking pool so the surface stays responsive; once a command is
/// executing it is never killed by user input.
pub async fn run_confirm_loop(
    mut controller: ConfirmController,
    show_rx: Receiver<ResolvedCommand>,
    input_rx: Receiver<ConfirmInput>,
    runner: Arc<dyn CommandRunner>,
) {
    let (exec_tx, exec_rx) = flume::unbounded::<ExecOutcome>();
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            Ok(command) = show_rx.recv_async() => {
                controller.show(command);
            }

            Ok(input) = input_rx.recv_async() => {
                if let Some(request) = controller.handle(input) {
                    spawn_execution(request, &runner, &exec_tx);
                }
            }

            Ok(outcome) = exec_rx.recv_async() => {
                controller.execution_finished(outcome);
            }

            _ = ticker.tick() => {
                if show_rx.is_disconnected() && input_rx.is_disconnected() {
                    break;
                }
                if let Some(request) = controller.tick() {
                    spawn_execution(request, &runner, &exec_tx);
                }
            }
        }
    }
}

fn spawn_execution(
    request: RunRequest,
    runner: &Arc<dyn CommandRunner>,
    exec_tx: &Sender<ExecOutcome>,
) {
    let runner = Arc::clone(runner);
    let exec_tx = exec_tx.clone();
    tokio::task::spawn_blocking(move || {
        let result = runner.run(&request.command_text, &request.options);
        let _ = exec_tx.send(ExecOutcome { request, result });
    });
}
