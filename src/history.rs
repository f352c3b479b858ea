//! Bounded execution history
//!
//! Append-only record of execution outcomes, capped at `MAX_LOG_ENTRIES`
//! with strict FIFO eviction. Pure consumer of the execution-result channel;
//! it never feeds back into resolution, matching, or execution.

use crate::confirm::ExecutionResult;
use flume::Receiver;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const MAX_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: u64,
    pub result: ExecutionResult,
}

#[derive(Default)]
pub struct ExecutionLog {
    entries: VecDeque<LogEntry>,
    next_id: u64,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result, evicting the oldest entry past capacity.
    /// Returns the id assigned to the new entry.
    pub fn append(&mut self, result: ExecutionResult) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(LogEntry { id, result });
        while self.entries.len() > MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries in arrival order, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Render the whole log as copyable text: timestamp, status tag,
    /// command, then the output indented beneath it.
    pub fn export(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let result = &entry.result;
            out.push_str(&format!(
                "[{}] [{}] {}\n",
                result.timestamp.format("%Y-%m-%d %H:%M:%S"),
                status_tag(result),
                result.command_text,
            ));
            for line in result.output.lines() {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
        }
        if out.is_empty() {
            out.push_str("No executions recorded yet.\n");
        }
        out
    }
}

fn status_tag(result: &ExecutionResult) -> &'static str {
    if result.is_error {
        "error"
    } else if result.opened_in_window {
        "window"
    } else {
        "ok"
    }
}

/// Type alias for the shared log handle
pub type SharedLog = Arc<Mutex<ExecutionLog>>;

pub fn new_shared() -> SharedLog {
    Arc::new(Mutex::new(ExecutionLog::new()))
}

/// Drain execution results into the shared log until the channel closes.
/// Safe to call from any result-delivery path; the mutex serializes appends.
pub fn run_log_consumer(rx: Receiver<ExecutionResult>, log: SharedLog) {
    while let Ok(result) = rx.recv() {
        if let Ok(mut log) = log.lock() {
            log.append(result);
        }
    }
}
