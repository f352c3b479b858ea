//! hark - voice command resolution and confirmation pipeline
//!
//! Turns a spoken utterance into either a pre-registered command match or an
//! LLM-generated shell command, presents it on a time-boxed, cancellable
//! confirmation surface, executes it under explicit safety options, and
//! records the outcome in a bounded history.

pub mod config;
pub mod confirm;
pub mod generator;
pub mod history;
pub mod matcher;
pub mod pipeline;
pub mod runner;
pub mod tui;
