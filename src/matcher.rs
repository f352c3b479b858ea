//! Trigger phrase matching using string similarity
//!
//! Scores spoken text against registered trigger phrases and returns the
//! best enabled match at or above its threshold. The metric is a swappable
//! strategy so callers never assume a particular scoring function.

use crate::config::VoiceCommand;
use serde::Deserialize;

/// Ties within this distance keep the earlier-listed command, so
/// configuration order stays meaningful and resolution is reproducible.
pub const SCORE_EPSILON: f64 = 1e-6;

/// Minimum per-word score for a word pair to count in the `Words` metric
const WORD_MATCH_THRESHOLD: f64 = 0.7;

/// Similarity metric for trigger matching
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    /// Normalized Levenshtein distance over the whole phrase (default)
    #[default]
    Levenshtein,
    /// Word-level overlap: per spoken word, best fuzzy match against the
    /// trigger words, combined with coverage and length weighting
    Words,
}

/// A matched command with its similarity score
#[derive(Debug, Clone)]
pub struct CommandMatch {
    pub command: VoiceCommand,
    pub score: f64,
}

/// Find the best matching enabled command for the given spoken text.
///
/// A command's threshold is its own `similarity_threshold` when set, else
/// `default_threshold`. Among candidates tied at the maximum score the one
/// appearing first in the list wins. Empty or whitespace-only spoken text
/// never matches. Disabled commands are not scored at all.
pub fn resolve(
    spoken_text: &str,
    commands: &[VoiceCommand],
    default_threshold: f64,
    metric: SimilarityMetric,
) -> Option<CommandMatch> {
    let spoken = normalize(spoken_text);
    if spoken.is_empty() {
        return None;
    }

    let mut best: Option<CommandMatch> = None;

    for cmd in commands.iter().filter(|c| c.enabled) {
        let trigger = normalize(&cmd.trigger_phrase);
        let threshold = cmd.similarity_threshold.unwrap_or(default_threshold);
        let score = similarity(metric, &spoken, &trigger);

        if score < threshold {
            continue;
        }

        match &best {
            Some(current) if score <= current.score + SCORE_EPSILON => {}
            _ => {
                best = Some(CommandMatch {
                    command: cmd.clone(),
                    score,
                });
            }
        }
    }

    best
}

/// Score two normalized phrases with the given metric, in [0, 1]
pub fn similarity(metric: SimilarityMetric, a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    match metric {
        SimilarityMetric::Levenshtein => normalized_levenshtein(a, b),
        SimilarityMetric::Words => word_overlap(a, b),
    }
}

/// Lowercase, trim, and collapse whitespace for matching
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Calculate Levenshtein distance between two strings
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0; b.len() + 1]; a.len() + 1];

    for i in 0..=a.len() {
        dp[i][0] = i;
    }
    for j in 0..=b.len() {
        dp[0][j] = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }
    dp[a.len()][b.len()]
}

/// Edit distance scaled to [0, 1]; 1.0 means identical
fn normalized_levenshtein(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Word-overlap score: for each spoken word, take the best fuzzy match among
/// the trigger words; combine coverage, match quality, and a length ratio.
fn word_overlap(a: &str, b: &str) -> f64 {
    let a_words: Vec<&str> = a.split_whitespace().collect();
    let b_words: Vec<&str> = b.split_whitespace().collect();

    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }

    let mut total_score = 0.0;
    let mut matched = 0usize;

    for a_word in &a_words {
        let mut best = 0.0f64;
        for b_word in &b_words {
            let score = if a_word == b_word {
                1.0
            } else {
                normalized_levenshtein(a_word, b_word)
            };
            if score >= WORD_MATCH_THRESHOLD {
                best = best.max(score);
            }
        }
        if best >= WORD_MATCH_THRESHOLD {
            total_score += best;
            matched += 1;
        }
    }

    let coverage = matched as f64 / a_words.len() as f64;
    let quality = if matched > 0 {
        total_score / matched as f64
    } else {
        0.0
    };
    let len_ratio =
        a_words.len().min(b_words.len()) as f64 / a_words.len().max(b_words.len()) as f64;

    // coverage dominates, quality refines, length breaks near-ties
    coverage * 0.7 + quality * coverage * 0.2 + len_ratio * 0.1
}
