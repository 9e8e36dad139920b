//! Heuristic response evaluator.
//!
//! Maps a `(prompt, response, category)` triple to a deterministic quality
//! score in [0,1] plus human-readable notes. No model or network call is
//! involved; this is an intentionally approximate proxy used to judge local
//! models, not a ground-truth grader.

use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// Constants
// =============================================================================

/// Responses shorter than this (trimmed) score exactly 0.0.
pub const MIN_RESPONSE_CHARS: usize = 10;

/// Responses shorter than this get partial length credit only.
pub const SHORT_RESPONSE_CHARS: usize = 50;

/// Partial credit assigned to very short responses.
pub const SHORT_RESPONSE_CREDIT: f64 = 0.3;

/// Credit assigned when a response blows past the prompt's expected length.
pub const PADDED_RESPONSE_CREDIT: f64 = 0.6;

/// Criterion weights. Relevance dominates because topical overlap is the
/// strongest cheap proxy for accuracy and completeness.
pub const WEIGHT_LENGTH: f64 = 0.25;
pub const WEIGHT_STRUCTURE: f64 = 0.20;
pub const WEIGHT_RELEVANCE: f64 = 0.35;
pub const WEIGHT_FORMATTING: f64 = 0.20;

// =============================================================================
// Result type
// =============================================================================

/// Outcome of evaluating one response.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    /// Weighted mean of the criteria scores, clamped to [0,1].
    pub score: f64,
    /// Ordered findings, suitable for storing alongside the test row.
    pub notes: Vec<String>,
    /// Per-criterion partial scores.
    pub criteria_scores: BTreeMap<&'static str, f64>,
}

// =============================================================================
// Evaluation
// =============================================================================

/// Score a response against its prompt.
///
/// Pure and total: any string input, including empty, non-ASCII, or very
/// long text, produces a well-formed result. Responses under
/// [`MIN_RESPONSE_CHARS`] trimmed characters short-circuit to 0.0.
pub fn evaluate(prompt: &str, response: &str, category: &str) -> Evaluation {
    let trimmed = response.trim();
    if trimmed.chars().count() < MIN_RESPONSE_CHARS {
        return Evaluation {
            score: 0.0,
            notes: vec!["Response too short or empty".to_string()],
            criteria_scores: BTreeMap::new(),
        };
    }

    let mut notes = Vec::new();
    let mut criteria_scores = BTreeMap::new();

    criteria_scores.insert("length", length_score(prompt, trimmed, &mut notes));
    criteria_scores.insert("structure", structure_score(trimmed, &mut notes));
    criteria_scores.insert("relevance", relevance_score(prompt, trimmed, &mut notes));
    criteria_scores.insert(
        "formatting",
        formatting_score(trimmed, category, &mut notes),
    );

    let weighted: f64 = criteria_scores
        .iter()
        .map(|(name, score)| criterion_weight(name) * score)
        .sum();
    let total_weight: f64 = criteria_scores
        .keys()
        .map(|name| criterion_weight(name))
        .sum();
    let score = if total_weight > 0.0 {
        (weighted / total_weight).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Evaluation {
        score,
        notes,
        criteria_scores,
    }
}

fn criterion_weight(name: &str) -> f64 {
    match name {
        "length" => WEIGHT_LENGTH,
        "structure" => WEIGHT_STRUCTURE,
        "relevance" => WEIGHT_RELEVANCE,
        "formatting" => WEIGHT_FORMATTING,
        _ => 0.0,
    }
}

/// Penalize responses that are too brief to address the prompt, and padded
/// responses far beyond what the prompt calls for.
fn length_score(prompt: &str, response: &str, notes: &mut Vec<String>) -> f64 {
    let response_chars = response.chars().count();
    if response_chars < SHORT_RESPONSE_CHARS {
        notes.push("Response may be too brief for the prompt".to_string());
        return SHORT_RESPONSE_CREDIT;
    }

    // Generous ceiling derived from prompt size; honest answers to the
    // built-in prompts never trip it, runaway generation does.
    let expected_ceiling = (prompt.trim().chars().count() * 20).max(1_200);
    if response_chars > expected_ceiling {
        notes.push("Response is much longer than the prompt calls for".to_string());
        return PADDED_RESPONSE_CREDIT;
    }

    1.0
}

/// Reward multi-sentence, multi-paragraph, or list-shaped responses.
fn structure_score(response: &str, notes: &mut Vec<String>) -> f64 {
    let sentence_marks = response
        .chars()
        .filter(|c| matches!(c, '.' | '!' | '?'))
        .count();
    let has_breaks = response.contains('\n');

    match (sentence_marks >= 2, has_breaks) {
        (true, true) => 1.0,
        (true, false) => 0.8,
        (false, true) => 0.7,
        (false, false) => {
            notes.push("Response lacks sentence or paragraph structure".to_string());
            0.4
        }
    }
}

/// Content-word overlap between prompt and response.
fn relevance_score(prompt: &str, response: &str, notes: &mut Vec<String>) -> f64 {
    let response_lower = response.to_lowercase();
    let mut content_words: Vec<String> = prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .map(|w| w.to_lowercase())
        .collect();
    content_words.sort();
    content_words.dedup();

    if content_words.is_empty() {
        return 1.0;
    }

    let matched = content_words
        .iter()
        .filter(|w| response_lower.contains(w.as_str()))
        .count();
    let ratio = matched as f64 / content_words.len() as f64;

    if ratio < 0.25 {
        notes.push("Response shares little vocabulary with the prompt".to_string());
    }

    // Half the prompt's content words is already full credit; answers
    // legitimately paraphrase.
    (0.2 + ratio * 1.6).min(1.0)
}

/// Category-aware formatting check.
fn formatting_score(response: &str, category: &str, notes: &mut Vec<String>) -> f64 {
    let has_code_block = response.contains("```")
        || response
            .lines()
            .any(|l| l.starts_with("    ") && !l.trim().is_empty());
    let has_list = response
        .lines()
        .any(|l| {
            let t = l.trim_start();
            t.starts_with("- ")
                || t.starts_with("* ")
                || t.chars().next().is_some_and(|c| c.is_ascii_digit()) && t.contains(". ")
        });
    let has_paragraphs = response.contains("\n\n");

    match category {
        "coding" => {
            if has_code_block {
                1.0
            } else {
                notes.push("No code block in a coding response".to_string());
                0.5
            }
        }
        "reasoning" | "analysis" => {
            if has_list || has_paragraphs {
                1.0
            } else {
                0.8
            }
        }
        "writing" | "creative" => {
            if has_paragraphs || response.chars().filter(|c| *c == '.').count() >= 2 {
                1.0
            } else {
                0.7
            }
        }
        _ => {
            let ends_punctuated = response
                .trim_end()
                .chars()
                .last()
                .is_some_and(|c| matches!(c, '.' | '!' | '?' | '`'));
            if ends_punctuated {
                1.0
            } else {
                0.7
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
