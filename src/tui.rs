//! Confirmation surface rendering and input translation
//!
//! Raw-mode terminal panel with synchronized updates. Keys are the primary
//! action controls; a mouse press anywhere on the surface background toggles
//! the countdown pause. The surface only translates events - every decision
//! about what a gesture means belongs to the confirmation controller.

use crate::confirm::{CommandSource, ConfirmInput, SurfaceEvent};
use crossterm::event::{
    DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEventKind,
};
use crossterm::terminal::{self, ClearType};
use crossterm::{cursor, execute, queue};
use std::io::{self, Write, stdout};
use unicode_width::UnicodeWidthStr;

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const BAR_CELLS: usize = 4;
const BLOCKS: &[char] = &[' ', '▏', '▎', '▍', '▌', '▋', '▊', '▉', '█'];

/// Actions the host loop performs on behalf of the surface
#[derive(Debug)]
pub enum SurfaceAction {
    /// An utterance was submitted at the idle prompt
    Submit(String),
    /// A gesture for the confirmation controller
    Input(ConfirmInput),
    ShowHistory,
    ClearHistory,
    Quit,
}

#[derive(Clone, Copy, PartialEq)]
enum Panel {
    Idle,
    Confirm,
}

pub struct Surface {
    panel: Panel,
    utterance: String,
    resolving: bool,

    command_text: String,
    spoken_text: String,
    source: Option<CommandSource>,
    countdown: Option<(u64, u64)>, // (remaining, total) ms
    paused: bool,
    editing: bool,
    edit_buffer: String,
    cursor_pos: usize,
    executing: bool,
    result: Option<(String, bool)>, // (output, is_error)
    expanded: bool,
    notice: Option<String>,

    status_drawn: bool,
    last_drawn_lines: usize,
    spin_frame: usize,
}

impl Surface {
    pub fn new() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(stdout(), EnableMouseCapture, cursor::Hide)?;
        Ok(Self {
            panel: Panel::Idle,
            utterance: String::new(),
            resolving: false,
            command_text: String::new(),
            spoken_text: String::new(),
            source: None,
            countdown: None,
            paused: false,
            editing: false,
            edit_buffer: String::new(),
            cursor_pos: 0,
            executing: false,
            result: None,
            expanded: false,
            notice: None,
            status_drawn: false,
            last_drawn_lines: 0,
            spin_frame: 0,
        })
    }

    pub fn restore(&self) -> io::Result<()> {
        execute!(stdout(), DisableMouseCapture, cursor::Show, cursor::MoveToColumn(0))?;
        terminal::disable_raw_mode()?;
        println!();
        Ok(())
    }

    pub fn set_resolving(&mut self, resolving: bool) {
        self.resolving = resolving;
    }

    pub fn show_notice(&mut self, text: impl Into<String>) {
        self.notice = Some(text.into());
        self.resolving = false;
    }

    // ========================================================================
    // Surface events from the controller
    // ========================================================================

    pub fn apply(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Presented {
                command_text,
                spoken_text,
                source,
                countdown_ms,
            } => {
                self.panel = Panel::Confirm;
                self.command_text = command_text;
                self.spoken_text = spoken_text;
                self.source = Some(source);
                self.countdown = countdown_ms.map(|total| (total, total));
                self.paused = false;
                self.editing = false;
                self.edit_buffer.clear();
                self.cursor_pos = 0;
                self.executing = false;
                self.result = None;
                self.expanded = false;
                self.notice = None;
                self.resolving = false;
            }
            SurfaceEvent::Countdown {
                remaining_ms,
                total_ms,
            } => {
                self.countdown = Some((remaining_ms, total_ms));
            }
            SurfaceEvent::PauseChanged(paused) => {
                self.paused = paused;
            }
            SurfaceEvent::EditBegan { text } => {
                self.editing = true;
                self.countdown = None;
                self.cursor_pos = text.chars().count();
                self.edit_buffer = text;
            }
            SurfaceEvent::Executing => {
                self.executing = true;
                self.countdown = None;
            }
            SurfaceEvent::Completed { output, is_error } => {
                self.executing = false;
                self.editing = false;
                self.result = Some((output, is_error));
            }
            SurfaceEvent::Expanded => {
                self.expanded = true;
            }
            SurfaceEvent::Dismissed => {
                self.panel = Panel::Idle;
                self.command_text.clear();
                self.spoken_text.clear();
                self.source = None;
                self.countdown = None;
                self.paused = false;
                self.editing = false;
                self.executing = false;
                self.result = None;
                self.expanded = false;
            }
            SurfaceEvent::Notice(text) => {
                self.notice = Some(text);
            }
        }
    }

    // ========================================================================
    // Input translation
    // ========================================================================

    pub fn handle_event(&mut self, event: Event) -> Option<SurfaceAction> {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
            Event::Mouse(mouse) => {
                // no clickable controls exist, so every press is background
                if self.panel == Panel::Confirm && matches!(mouse.kind, MouseEventKind::Down(_)) {
                    Some(SurfaceAction::Input(ConfirmInput::BackgroundPress))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<SurfaceAction> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => return Some(SurfaceAction::Quit),
                KeyCode::Char('h') => return Some(SurfaceAction::ShowHistory),
                KeyCode::Char('l') => return Some(SurfaceAction::ClearHistory),
                KeyCode::Char('r') if self.panel == Panel::Confirm => {
                    return Some(SurfaceAction::Input(ConfirmInput::Confirm));
                }
                _ => return None,
            }
        }

        match self.panel {
            Panel::Idle => self.handle_idle_key(key),
            Panel::Confirm if self.editing => self.handle_edit_key(key),
            Panel::Confirm => self.handle_confirm_key(key),
        }
    }

    fn handle_idle_key(&mut self, key: KeyEvent) -> Option<SurfaceAction> {
        match key.code {
            KeyCode::Enter => {
                let text = self.utterance.trim().to_string();
                self.utterance.clear();
                if text.is_empty() {
                    None
                } else {
                    self.notice = None;
                    self.resolving = true;
                    Some(SurfaceAction::Submit(text))
                }
            }
            KeyCode::Backspace => {
                self.utterance.pop();
                None
            }
            KeyCode::Esc => Some(SurfaceAction::Quit),
            KeyCode::Char(c) => {
                self.utterance.push(c);
                None
            }
            _ => None,
        }
    }

    fn handle_confirm_key(&mut self, key: KeyEvent) -> Option<SurfaceAction> {
        if matches!(self.result, Some((_, true))) {
            // expanded error view: both keys dismiss
            return match key.code {
                KeyCode::Enter | KeyCode::Esc => {
                    Some(SurfaceAction::Input(ConfirmInput::Cancel))
                }
                _ => None,
            };
        }
        match key.code {
            // the designated double-confirm key
            KeyCode::Enter => Some(SurfaceAction::Input(ConfirmInput::ConfirmPress)),
            KeyCode::Esc => Some(SurfaceAction::Input(ConfirmInput::Cancel)),
            KeyCode::Char('e') if !self.executing && self.result.is_none() => {
                Some(SurfaceAction::Input(ConfirmInput::Edit))
            }
            _ => None,
        }
    }

    fn handle_edit_key(&mut self, key: KeyEvent) -> Option<SurfaceAction> {
        match key.code {
            KeyCode::Enter => Some(SurfaceAction::Input(ConfirmInput::Confirm)),
            KeyCode::Esc => Some(SurfaceAction::Input(ConfirmInput::Cancel)),
            KeyCode::Char(c) => {
                let byte_pos = self.char_to_byte_index(self.cursor_pos);
                self.edit_buffer.insert(byte_pos, c);
                self.cursor_pos += 1;
                self.edited()
            }
            KeyCode::Backspace if self.cursor_pos > 0 => {
                self.cursor_pos -= 1;
                let byte_pos = self.char_to_byte_index(self.cursor_pos);
                self.edit_buffer.remove(byte_pos);
                self.edited()
            }
            KeyCode::Delete if self.cursor_pos < self.char_count() => {
                let byte_pos = self.char_to_byte_index(self.cursor_pos);
                self.edit_buffer.remove(byte_pos);
                self.edited()
            }
            KeyCode::Left => {
                self.cursor_pos = self.cursor_pos.saturating_sub(1);
                None
            }
            KeyCode::Right if self.cursor_pos < self.char_count() => {
                self.cursor_pos += 1;
                None
            }
            KeyCode::Home => {
                self.cursor_pos = 0;
                None
            }
            KeyCode::End => {
                self.cursor_pos = self.char_count();
                None
            }
            _ => None,
        }
    }

    fn edited(&mut self) -> Option<SurfaceAction> {
        Some(SurfaceAction::Input(ConfirmInput::EditedText(
            self.edit_buffer.clone(),
        )))
    }

    fn char_to_byte_index(&self, char_idx: usize) -> usize {
        self.edit_buffer
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.edit_buffer.len())
    }

    fn char_count(&self) -> usize {
        self.edit_buffer.chars().count()
    }

    // ========================================================================
    // Drawing
    // ========================================================================

    /// Print scrolling content above the redrawn panel
    pub fn show_message(&mut self, text: &str) {
        let mut out = stdout();
        if self.status_drawn && self.last_drawn_lines > 0 {
            let _ = queue!(
                out,
                cursor::MoveUp(self.last_drawn_lines as u16),
                cursor::MoveToColumn(0),
                terminal::Clear(ClearType::FromCursorDown)
            );
        }
        for line in text.lines() {
            let _ = queue!(
                out,
                crossterm::style::Print(line),
                crossterm::style::Print("\r\n")
            );
        }
        let _ = out.flush();
        self.status_drawn = false;
        self.last_drawn_lines = 0;
    }

    /// Redraw the whole panel in place
    pub fn draw(&mut self) -> io::Result<()> {
        let mut out = stdout();
        let term_width = terminal::size().map(|(w, _)| w as usize).unwrap_or(80);

        let (body, prompt, cursor_offset) = match self.panel {
            Panel::Idle => self.idle_lines(),
            Panel::Confirm => self.confirm_lines(),
        };

        queue!(out, cursor::Hide)?;
        if self.status_drawn && self.last_drawn_lines > 0 {
            queue!(out, cursor::MoveUp(self.last_drawn_lines as u16))?;
        }
        queue!(
            out,
            cursor::MoveToColumn(0),
            terminal::Clear(ClearType::FromCursorDown)
        )?;

        for line in &body {
            queue!(
                out,
                crossterm::style::Print(truncate_to_width(line, term_width)),
                crossterm::style::Print("\r\n")
            )?;
        }
        queue!(out, crossterm::style::Print(&prompt))?;

        let prompt_visible = visible_width(&prompt).max(cursor_offset);
        let prompt_rows = if term_width > 0 && prompt_visible > 0 {
            prompt_visible.div_ceil(term_width)
        } else {
            1
        };
        self.last_drawn_lines = body.len() + prompt_rows.saturating_sub(1);

        queue!(out, cursor::MoveToColumn(cursor_offset as u16), cursor::Show)?;
        out.flush()?;
        self.status_drawn = true;
        Ok(())
    }

    fn idle_lines(&mut self) -> (Vec<String>, String, usize) {
        let mut body = Vec::new();
        let status = if self.resolving {
            self.spin_frame = (self.spin_frame + 1) % SPINNER.len();
            format!("\x1b[90m{} Resolving…  ctrl+c quit\x1b[0m", SPINNER[self.spin_frame])
        } else {
            "\x1b[90m🎤 Type an utterance  │  ctrl+h history  │  ctrl+l clear  │  ctrl+c quit\x1b[0m"
                .to_string()
        };
        body.push(status);
        if let Some(notice) = &self.notice {
            body.push(format!("\x1b[33m! {}\x1b[0m", notice));
        }
        let prompt = format!("\x1b[32m>\x1b[0m {}", self.utterance);
        let cursor_offset = 2 + self.utterance.width();
        (body, prompt, cursor_offset)
    }

    fn confirm_lines(&mut self) -> (Vec<String>, String, usize) {
        let mut body = Vec::new();

        let badge = match self.source {
            Some(CommandSource::Generated) => "\x1b[95m[generated]\x1b[0m",
            _ => "\x1b[92m[matched]\x1b[0m",
        };
        body.push(format!("{} \x1b[90m“{}”\x1b[0m", badge, self.spoken_text));

        if !self.editing {
            body.push(format!("\x1b[36m$\x1b[0m {}", self.command_text));
        }

        if let Some((output, is_error)) = &self.result {
            if *is_error {
                body.push("\x1b[91m✗ Command failed\x1b[0m".to_string());
                if self.expanded {
                    for line in output.lines() {
                        body.push(format!("  \x1b[91m{}\x1b[0m", line));
                    }
                } else {
                    body.push(format!("  \x1b[91m{}\x1b[0m", first_line(output)));
                }
                body.push("\x1b[90menter/esc dismiss\x1b[0m".to_string());
            } else {
                body.push(format!("\x1b[92m✓\x1b[0m {}", first_line(output)));
            }
        } else if self.executing {
            self.spin_frame = (self.spin_frame + 1) % SPINNER.len();
            body.push(format!("\x1b[93m{} Running…\x1b[0m", SPINNER[self.spin_frame]));
        } else if self.editing {
            body.push(
                "\x1b[90menter run edited  │  esc cancel\x1b[0m".to_string(),
            );
        } else {
            if let Some((remaining, total)) = self.countdown {
                let state = if self.paused {
                    format!("\x1b[33m⏸ paused at {:.1}s\x1b[0m", remaining as f64 / 1000.0)
                } else {
                    format!(
                        "\x1b[33m{} auto-run in {:.1}s\x1b[0m",
                        countdown_bar(remaining, total),
                        remaining as f64 / 1000.0
                    )
                };
                body.push(state);
            }
            body.push(
                "\x1b[90menter twice to confirm  │  ctrl+r run now  │  e edit  │  click pause  │  esc cancel\x1b[0m"
                    .to_string(),
            );
        }

        let (prompt, cursor_offset) = if self.editing {
            let prompt = format!("\x1b[36medit$\x1b[0m {}", self.edit_buffer);
            let prefix = 6; // "edit$ "
            let offset = prefix
                + self
                    .edit_buffer
                    .chars()
                    .take(self.cursor_pos)
                    .collect::<String>()
                    .width();
            (prompt, offset)
        } else {
            (String::new(), 0)
        };

        (body, prompt, cursor_offset)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// Four-cell progress bar with partial blocks, draining as time runs out
fn countdown_bar(remaining_ms: u64, total_ms: u64) -> String {
    if total_ms == 0 {
        return " ".repeat(BAR_CELLS);
    }
    let progress = remaining_ms as f64 / total_ms as f64;
    let total_steps = BAR_CELLS * 8;
    let step = (progress * total_steps as f64).round() as usize;
    let full = step / 8;
    let partial = step % 8;
    let mut bar = "█".repeat(full.min(BAR_CELLS));
    if full < BAR_CELLS {
        bar.push(BLOCKS[partial]);
        bar.push_str(&" ".repeat(BAR_CELLS - full - 1));
    }
    bar
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Visible width ignoring ANSI color sequences
fn visible_width(text: &str) -> usize {
    strip_ansi(text).width()
}

fn truncate_to_width(line: &str, width: usize) -> String {
    if visible_width(line) <= width {
        return line.to_string();
    }
    // colored lines are short; only plain overflow is truncated hard
    let stripped = strip_ansi(line);
    let mut out = String::new();
    let mut used = 0;
    for c in stripped.chars() {
        let w = c.to_string().width();
        if used + w + 1 > width {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push('…');
    out
}

fn strip_ansi(text: &str) -> String {
    let mut out = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // skip to the terminating letter of the CSI sequence
            for follow in chars.by_ref() {
                if follow.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
