//! LLM fallback - turns an unmatched utterance into a single-line shell command
//!
//! The provider is asked for exactly one line of command text. Anything else
//! (the safety sentinel, an empty answer, or a multi-line answer) counts as a
//! rejection, which is distinct from a transport failure.

use crate::config::{FallbackConfig, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Marker a provider returns to refuse a request on safety grounds
pub const UNSAFE_SENTINEL: &str = "UNSAFE_REQUEST";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Chat-completion provider boundary; the generator only needs one answer
/// string back for a (system, user) prompt pair.
pub trait ChatProvider: Send + Sync {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ProviderError>;
}

/// Why a provider answer was not usable as a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Provider answered with the safety sentinel
    Unsafe,
    /// Nothing left after stripping wrappers
    Empty,
    /// More than one non-empty line left after stripping wrappers
    MultiLine,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Unsafe => write!(f, "the request was declined as unsafe"),
            RejectReason::Empty => write!(f, "the provider returned an empty answer"),
            RejectReason::MultiLine => {
                write!(f, "the provider returned more than one line of command text")
            }
        }
    }
}

/// Error type for fallback generation
#[derive(Debug)]
pub enum GenerateError {
    /// Intentional refusal or unusable answer; never retried
    Rejected(RejectReason),
    /// Transport or provider failure; also never retried automatically
    Provider(String),
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::Rejected(reason) => write!(f, "{}", reason),
            GenerateError::Provider(msg) => write!(f, "provider request failed: {}", msg),
        }
    }
}

impl std::error::Error for GenerateError {}

/// Generates a shell command for an utterance no trigger matched
pub struct FallbackGenerator {
    provider: Box<dyn ChatProvider>,
    system_prompt: String,
}

impl FallbackGenerator {
    pub fn new(provider: Box<dyn ChatProvider>, system_prompt: impl Into<String>) -> Self {
        Self {
            provider,
            system_prompt: system_prompt.into(),
        }
    }

    /// Build a generator backed by the HTTP provider from config
    pub fn from_config(config: &FallbackConfig) -> Result<Self, ProviderError> {
        let provider = HttpProvider::new(config.provider.clone())?;
        Ok(Self::new(Box::new(provider), config.system_prompt.clone()))
    }

    /// Ask the provider for a single-line command for the spoken text
    pub fn generate(&self, spoken_text: &str) -> Result<String, GenerateError> {
        let raw = self
            .provider
            .complete(&self.system_prompt, spoken_text)
            .map_err(|e| GenerateError::Provider(e.to_string()))?;
        debug!(answer = %raw.trim(), "fallback provider answered");
        extract_command(&raw).map_err(GenerateError::Rejected)
    }
}

/// Reduce a provider answer to usable command text.
///
/// Strips a surrounding code fence (with optional language tag) or matching
/// surrounding quotes, drops blank lines, then requires exactly one line that
/// is not the safety sentinel. Two or more real lines are ambiguous and are
/// rejected rather than truncated.
pub fn extract_command(raw: &str) -> Result<String, RejectReason> {
    let stripped = strip_wrappers(raw);
    let lines: Vec<&str> = stripped
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    match lines.as_slice() {
        [] => Err(RejectReason::Empty),
        [line] => {
            if *line == UNSAFE_SENTINEL {
                Err(RejectReason::Unsafe)
            } else {
                Ok((*line).to_string())
            }
        }
        _ => Err(RejectReason::MultiLine),
    }
}

/// Strip one layer of code fence or surrounding quote characters
fn strip_wrappers(text: &str) -> String {
    let mut t = text.trim().to_string();

    if let Some(rest) = t.strip_prefix("```") {
        let mut body = rest;
        if let Some(pos) = body.find('\n') {
            // first fence line is a language tag, not command text
            if body[..pos].trim().chars().all(|c| c.is_ascii_alphanumeric()) {
                body = &body[pos + 1..];
            }
        }
        let body = body.trim_end();
        let body = body.strip_suffix("```").unwrap_or(body);
        t = body.trim().to_string();
    }

    for quote in ['`', '"', '\''] {
        if t.len() >= 2 && t.starts_with(quote) && t.ends_with(quote) {
            let inner = &t[1..t.len() - 1];
            if !inner.contains(quote) {
                t = inner.trim().to_string();
            }
        }
    }

    t
}

// ============================================================================
// HTTP provider (OpenAI-compatible chat completions)
// ============================================================================

pub struct HttpProvider {
    client: reqwest::blocking::Client,
    provider: ProviderConfig,
}

impl HttpProvider {
    pub fn new(provider: ProviderConfig) -> Result<Self, ProviderError> {
        if provider.model.trim().is_empty() {
            return Err("no model configured for the fallback provider".into());
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, provider })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatProvider for HttpProvider {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ProviderError> {
        let url = format!(
            "{}/chat/completions",
            self.provider.base_url.trim_end_matches('/')
        );
        let body = ChatRequest {
            model: &self.provider.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.provider.temperature,
            max_tokens: self.provider.max_tokens,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = self.provider.api_key.as_deref() {
            if !key.is_empty() {
                request = request.bearer_auth(key);
            }
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(format!("provider returned {}: {}", status, detail.trim()).into());
        }

        let parsed: ChatResponse = response.json()?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or("provider returned no content")?;
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        answer: Result<String, String>,
    }

    impl ChatProvider for StubProvider {
        fn complete(&self, _system: &str, _user: &str) -> Result<String, ProviderError> {
            match &self.answer {
                Ok(text) => Ok(text.clone()),
                Err(msg) => Err(msg.clone().into()),
            }
        }
    }

    fn generator(answer: Result<&str, &str>) -> FallbackGenerator {
        let stub = StubProvider {
            answer: answer.map(str::to_string).map_err(str::to_string),
        };
        FallbackGenerator::new(Box::new(stub), "one line only")
    }

    #[test]
    fn test_plain_answer_passes_through() {
        assert_eq!(extract_command("ls -la\n"), Ok("ls -la".to_string()));
    }

    #[test]
    fn test_fence_with_language_tag_stripped() {
        let raw = "```powershell\nGet-Date\n```";
        assert_eq!(extract_command(raw), Ok("Get-Date".to_string()));
    }

    #[test]
    fn test_inline_fence_stripped() {
        assert_eq!(extract_command("```ls```"), Ok("ls".to_string()));
    }

    #[test]
    fn test_surrounding_quotes_stripped() {
        assert_eq!(extract_command("\"echo hi\""), Ok("echo hi".to_string()));
        assert_eq!(extract_command("`uname -a`"), Ok("uname -a".to_string()));
    }

    #[test]
    fn test_internal_quotes_preserved() {
        // stripping here would split the quoted path
        let raw = r#""C:\tools\app.exe" "arg""#;
        assert_eq!(extract_command(raw), Ok(raw.to_string()));
    }

    #[test]
    fn test_sentinel_rejected() {
        assert_eq!(extract_command("UNSAFE_REQUEST"), Err(RejectReason::Unsafe));
        assert_eq!(
            extract_command("```\nUNSAFE_REQUEST\n```"),
            Err(RejectReason::Unsafe)
        );
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(extract_command(""), Err(RejectReason::Empty));
        assert_eq!(extract_command("  \n \n"), Err(RejectReason::Empty));
        assert_eq!(extract_command("``````"), Err(RejectReason::Empty));
    }

    #[test]
    fn test_multiline_rejected() {
        let raw = "cd /tmp\nrm -rf scratch";
        assert_eq!(extract_command(raw), Err(RejectReason::MultiLine));
        let fenced = "```\ncd /tmp\nrm -rf scratch\n```";
        assert_eq!(extract_command(fenced), Err(RejectReason::MultiLine));
    }

    #[test]
    fn test_blank_lines_around_command_tolerated() {
        assert_eq!(
            extract_command("\n\nsystemctl suspend\n\n"),
            Ok("systemctl suspend".to_string())
        );
    }

    #[test]
    fn test_generate_maps_rejection() {
        let generated = generator(Ok("UNSAFE_REQUEST")).generate("make me a sandwich");
        assert!(matches!(
            generated,
            Err(GenerateError::Rejected(RejectReason::Unsafe))
        ));
    }

    #[test]
    fn test_generate_maps_provider_failure() {
        let generated = generator(Err("connection refused")).generate("open downloads");
        match generated {
            Err(GenerateError::Provider(msg)) => assert!(msg.contains("connection refused")),
            other => panic!("expected provider failure, got {:?}", other.map_err(|e| e.to_string())),
        }
    }

    #[test]
    fn test_generate_strips_and_returns_command() {
        let generated = generator(Ok("```sh\nxdg-open ~/Downloads\n```"))
            .generate("open my downloads folder");
        assert_eq!(generated.unwrap(), "xdg-open ~/Downloads");
    }
}
