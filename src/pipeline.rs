//! Resolution flow: spoken text to a presentable command
//!
//! A trigger match wins outright; otherwise the LLM fallback is consulted
//! when enabled. Matched commands carry their per-command execution options
//! resolved against the global defaults; generated commands always carry the
//! global defaults and never auto-run.

use crate::config::Config;
use crate::confirm::{CommandSource, ResolvedCommand};
use crate::generator::{FallbackGenerator, GenerateError, RejectReason};
use crate::matcher;
use tracing::debug;

/// Outcome of one resolution attempt
#[derive(Debug)]
pub enum Resolution {
    /// A command is ready to present
    Resolved(ResolvedCommand),
    /// Nothing matched and no fallback produced a command
    NoMatch { spoken_text: String },
    /// The fallback declined (safety sentinel or unusable answer)
    Rejected(RejectReason),
    /// The fallback provider failed (transport or provider error)
    Failed(String),
}

pub fn resolve(
    spoken_text: &str,
    config: &Config,
    generator: Option<&FallbackGenerator>,
) -> Resolution {
    // an empty utterance is not worth a provider round-trip either
    if spoken_text.trim().is_empty() {
        return Resolution::NoMatch {
            spoken_text: String::new(),
        };
    }

    if let Some(found) = matcher::resolve(
        spoken_text,
        &config.commands,
        config.matching.default_threshold,
        config.matching.metric,
    ) {
        debug!(
            trigger = %found.command.trigger_phrase,
            score = found.score,
            "trigger matched"
        );
        let options = found.command.resolve_execution_options(&config.execution);
        return Resolution::Resolved(ResolvedCommand {
            source: CommandSource::Matched,
            command_text: found.command.script.clone(),
            spoken_text: spoken_text.trim().to_string(),
            options,
        });
    }

    if config.fallback.enabled {
        if let Some(generator) = generator {
            debug!(spoken = %spoken_text, "no trigger matched, asking fallback");
            return match generator.generate(spoken_text) {
                Ok(command_text) => Resolution::Resolved(ResolvedCommand {
                    source: CommandSource::Generated,
                    command_text,
                    spoken_text: spoken_text.trim().to_string(),
                    options: config.execution.clone(),
                }),
                Err(GenerateError::Rejected(reason)) => Resolution::Rejected(reason),
                Err(GenerateError::Provider(message)) => Resolution::Failed(message),
            };
        }
    }

    Resolution::NoMatch {
        spoken_text: spoken_text.trim().to_string(),
    }
}
