use crate::matcher::SimilarityMetric;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub commands: Vec<VoiceCommand>,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub confirm: ConfirmConfig,
    #[serde(default)]
    pub execution: ExecutionOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            commands: Vec::new(),
            fallback: FallbackConfig::default(),
            confirm: ConfirmConfig::default(),
            execution: ExecutionOptions::default(),
        }
    }
}

// ============================================================================
// Matching Config
// ============================================================================

/// Valid range for per-command and default similarity thresholds
pub const THRESHOLD_MIN: f64 = 0.5;
pub const THRESHOLD_MAX: f64 = 1.0;

#[derive(Debug, Deserialize)]
pub struct MatchingConfig {
    /// Minimum similarity score for a trigger phrase to count as a match,
    /// used when a command does not set its own threshold
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,

    /// Similarity metric: "levenshtein" or "words"
    #[serde(default)]
    pub metric: SimilarityMetric,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            metric: SimilarityMetric::default(),
        }
    }
}

fn default_threshold() -> f64 {
    0.75
}

// ============================================================================
// Voice Commands
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct VoiceCommand {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Phrase the command expects to hear
    pub trigger_phrase: String,
    /// Shell command text to execute on a match
    pub script: String,
    /// Per-command threshold override; falls back to the default when unset
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-command execution overrides, merged over the global defaults
    #[serde(default)]
    pub execution: Option<ExecutionOverrides>,
}

fn default_enabled() -> bool {
    true
}

impl VoiceCommand {
    /// Resolve the effective execution options for this command by layering
    /// its overrides over the global defaults.
    pub fn resolve_execution_options(&self, defaults: &ExecutionOptions) -> ExecutionOptions {
        let mut options = defaults.clone();
        if let Some(overrides) = &self.execution {
            if let Some(silent) = overrides.silent {
                options.silent = silent;
            }
            if let Some(load_profile) = overrides.load_profile {
                options.load_profile = load_profile;
            }
            if let Some(shell) = overrides.shell {
                options.shell = shell;
            }
            if let Some(policy) = &overrides.execution_policy {
                options.execution_policy = Some(policy.clone());
            }
            if let Some(dir) = &overrides.working_directory {
                options.working_directory = Some(dir.clone());
            }
            if let Some(timeout) = overrides.timeout_seconds {
                options.timeout_seconds = timeout;
            }
        }
        options
    }
}

// ============================================================================
// Execution Options
// ============================================================================

/// Shell flavor used to run command text.
///
/// On Windows `Legacy` is Windows PowerShell 5.1 and `Modern` is pwsh; on
/// unix `Legacy` is /bin/sh and `Modern` is the user's $SHELL.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShellVariant {
    #[default]
    Legacy,
    Modern,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionOptions {
    /// Run hidden with captured output instead of opening a visible window
    #[serde(default = "default_silent")]
    pub silent: bool,

    /// Load the shell's profile/startup files
    #[serde(default)]
    pub load_profile: bool,

    #[serde(default)]
    pub shell: ShellVariant,

    /// Shell-specific execution policy flag; no unix equivalent
    #[serde(default)]
    pub execution_policy: Option<String>,

    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    /// Hard wall-clock bound for captured executions
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            silent: default_silent(),
            load_profile: false,
            shell: ShellVariant::default(),
            execution_policy: None,
            working_directory: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_silent() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Optional per-command execution overrides; unset fields inherit defaults
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExecutionOverrides {
    #[serde(default)]
    pub silent: Option<bool>,
    #[serde(default)]
    pub load_profile: Option<bool>,
    #[serde(default)]
    pub shell: Option<ShellVariant>,
    #[serde(default)]
    pub execution_policy: Option<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

// ============================================================================
// Confirmation Config
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ConfirmConfig {
    /// Auto-run matched commands after a countdown; generated commands
    /// always require explicit confirmation regardless of this flag
    #[serde(default)]
    pub auto_run: bool,

    #[serde(default = "default_auto_run_seconds")]
    pub auto_run_seconds: u32,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            auto_run: false,
            auto_run_seconds: default_auto_run_seconds(),
        }
    }
}

fn default_auto_run_seconds() -> u32 {
    4
}

// ============================================================================
// Fallback Config
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FallbackConfig {
    /// Ask an LLM for a command when nothing matches
    #[serde(default = "default_fallback_enabled")]
    pub enabled: bool,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: default_fallback_enabled(),
            system_prompt: default_system_prompt(),
            provider: ProviderConfig::default(),
        }
    }
}

fn default_fallback_enabled() -> bool {
    true
}

fn default_system_prompt() -> String {
    "You translate a spoken request into a single shell command. \
Respond with exactly one line containing only the command, with no markdown, \
no code fences, and no explanation. \
If the request is destructive, irreversible, or cannot be expressed safely as \
one command, respond with exactly UNSAFE_REQUEST."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Base URL - can use preset or explicit URL
    #[serde(default)]
    pub base_url: String,
    /// Preset shortcuts: "lm_studio", "openai", "ollama"
    #[serde(default)]
    pub preset: Option<String>,
    /// Model name; the fallback is unavailable while this is empty
    #[serde(default)]
    pub model: String,
    /// API key (supports ${ENV_VAR} syntax)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            preset: None,
            model: String::new(),
            api_key: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ProviderConfig {
    /// Resolve preset to base_url if needed, and expand env vars in api_key
    pub fn resolve_presets(&mut self) {
        if self.base_url.is_empty() {
            self.base_url = match self.preset.as_deref() {
                Some("lm_studio") | None => "http://localhost:1234/v1".to_string(),
                Some("openai") => "https://api.openai.com/v1".to_string(),
                Some("ollama") => "http://localhost:11434/v1".to_string(),
                Some(other) => {
                    warn!("unknown provider preset '{}', using LM Studio default", other);
                    "http://localhost:1234/v1".to_string()
                }
            };
        }

        if let Some(key) = &mut self.api_key {
            *key = expand_env_vars(key);
        }
    }
}

/// Expand ${VAR} to environment variable values
fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_else(|_| {
                warn!("environment variable '{}' not found", var_name);
                String::new()
            });
            result.replace_range(start..start + end + 1, &value);
        } else {
            break;
        }
    }

    result
}

// ============================================================================
// Loading
// ============================================================================

const DEFAULT_CONFIG_PATH: &str = "hark.toml";

impl Config {
    /// Load configuration from the given path, or from `hark.toml` in the
    /// working directory. A missing default file yields the built-in defaults;
    /// an unreadable or invalid file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Config::default()
        };

        config.fallback.provider.resolve_presets();
        config.sanitize();
        Ok(config)
    }

    /// Clamp out-of-range values and fill in missing command ids.
    fn sanitize(&mut self) {
        self.matching.default_threshold =
            clamp_threshold("default_threshold", self.matching.default_threshold);

        if self.execution.timeout_seconds == 0 {
            warn!("execution.timeout_seconds must be positive, using default");
            self.execution.timeout_seconds = default_timeout_seconds();
        }

        for (index, cmd) in self.commands.iter_mut().enumerate() {
            if cmd.id.trim().is_empty() {
                cmd.id = format!("cmd-{}", index + 1);
            }
            if let Some(threshold) = cmd.similarity_threshold {
                cmd.similarity_threshold = Some(clamp_threshold(&cmd.id, threshold));
            }
            if let Some(overrides) = &mut cmd.execution {
                if overrides.timeout_seconds == Some(0) {
                    warn!("{}: timeout_seconds must be positive, ignoring override", cmd.id);
                    overrides.timeout_seconds = None;
                }
            }
        }
    }
}

fn clamp_threshold(name: &str, value: f64) -> f64 {
    if (THRESHOLD_MIN..=THRESHOLD_MAX).contains(&value) {
        value
    } else {
        let clamped = value.clamp(THRESHOLD_MIN, THRESHOLD_MAX);
        warn!(
            "similarity threshold {} for '{}' outside [{}, {}], clamped to {}",
            value, name, THRESHOLD_MIN, THRESHOLD_MAX, clamped
        );
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.matching.default_threshold, 0.75);
        assert!(config.commands.is_empty());
        assert!(config.fallback.enabled);
        assert!(!config.confirm.auto_run);
        assert_eq!(config.confirm.auto_run_seconds, 4);
        assert!(config.execution.silent);
        assert_eq!(config.execution.timeout_seconds, 30);
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
[matching]
default_threshold = 0.8
metric = "words"

[[commands]]
name = "Lock"
trigger_phrase = "lock computer"
script = "loginctl lock-session"
similarity_threshold = 0.9

[[commands]]
trigger_phrase = "open downloads"
script = "xdg-open ~/Downloads"
enabled = false

[fallback]
enabled = true
system_prompt = "one line only"

[fallback.provider]
preset = "ollama"
model = "qwen2.5-coder"

[confirm]
auto_run = true
auto_run_seconds = 6

[execution]
silent = false
shell = "modern"
timeout_seconds = 10
"#;
        let mut config: Config = toml::from_str(raw).unwrap();
        config.fallback.provider.resolve_presets();
        config.sanitize();

        assert_eq!(config.commands.len(), 2);
        assert_eq!(config.commands[0].similarity_threshold, Some(0.9));
        assert_eq!(config.commands[0].id, "cmd-1");
        assert!(!config.commands[1].enabled);
        assert_eq!(config.fallback.provider.base_url, "http://localhost:11434/v1");
        assert!(config.confirm.auto_run);
        assert_eq!(config.confirm.auto_run_seconds, 6);
        assert_eq!(config.execution.shell, ShellVariant::Modern);
        assert!(!config.execution.silent);
    }

    #[test]
    fn test_thresholds_clamped() {
        let raw = r#"
[matching]
default_threshold = 1.4

[[commands]]
trigger_phrase = "x"
script = "true"
similarity_threshold = 0.1
"#;
        let mut config: Config = toml::from_str(raw).unwrap();
        config.sanitize();
        assert_eq!(config.matching.default_threshold, 1.0);
        assert_eq!(config.commands[0].similarity_threshold, Some(0.5));
    }

    #[test]
    fn test_zero_timeout_replaced() {
        let raw = r#"
[execution]
timeout_seconds = 0
"#;
        let mut config: Config = toml::from_str(raw).unwrap();
        config.sanitize();
        assert_eq!(config.execution.timeout_seconds, 30);
    }

    #[test]
    fn test_execution_overrides_merge() {
        let raw = r#"
[[commands]]
trigger_phrase = "lock computer"
script = "loginctl lock-session"

[commands.execution]
silent = false
timeout_seconds = 5
"#;
        let config: Config = toml::from_str(raw).unwrap();
        let defaults = ExecutionOptions::default();
        let resolved = config.commands[0].resolve_execution_options(&defaults);
        assert!(!resolved.silent);
        assert_eq!(resolved.timeout_seconds, 5);
        // untouched fields inherit defaults
        assert_eq!(resolved.shell, defaults.shell);
        assert_eq!(resolved.timeout_seconds, 5);
        assert!(resolved.working_directory.is_none());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: test-local variable, no concurrent env readers in this test
        unsafe { std::env::set_var("HARK_TEST_KEY", "sk-123") };
        assert_eq!(expand_env_vars("${HARK_TEST_KEY}"), "sk-123");
        assert_eq!(expand_env_vars("plain"), "plain");
        assert_eq!(expand_env_vars("pre-${HARK_TEST_KEY}-post"), "pre-sk-123-post");
    }

    #[test]
    fn test_preset_resolution_explicit_url_wins() {
        let mut provider = ProviderConfig {
            base_url: "http://example.test/v1".to_string(),
            preset: Some("openai".to_string()),
            ..ProviderConfig::default()
        };
        provider.resolve_presets();
        assert_eq!(provider.base_url, "http://example.test/v1");
    }
}
