//! Heuristic answer-grounding check.
//!
//! ```text
//! confidence = 0.4 × reference + 0.6 × overlap     (× 0.5 if any marker)
//! ```
//!
//! - **reference**: fraction of candidates whose title or format is named in
//!   the answer.
//! - **overlap**: fraction of the answer's key sentences (≥ 4 content
//!   words) that share at least 30% of their content words with the prompt.
//! - **markers**: hedging phrases typical of unsupported answers.
//!
//! An answer is grounded when confidence reaches the threshold and at least
//! `min_candidates` sources were available.

use serde::Serialize;
use std::collections::HashSet;

use crate::error::VaultError;
use crate::models::RetrievedCandidate;

const REFERENCE_WEIGHT: f64 = 0.4;
const OVERLAP_WEIGHT: f64 = 0.6;
const MARKER_PENALTY: f64 = 0.5;
const SENTENCE_MATCH_RATIO: f64 = 0.3;
const KEY_SENTENCE_MIN_WORDS: usize = 4;
const MIN_WORD_LEN: usize = 3;

/// Phrases that suggest the answer is not drawn from the supplied context.
pub const HALLUCINATION_MARKERS: &[&str] = &[
    "as an ai",
    "as a language model",
    "i don't have access",
    "i do not have access",
    "i cannot verify",
    "i can't verify",
    "based on my training",
    "my training data",
    "as of my last update",
    "to the best of my knowledge",
    "i'm not sure",
    "i am not sure",
    "i believe",
    "it is possible that",
    "generally speaking",
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "his", "how", "its", "may", "who", "did", "yes", "they", "this",
    "that", "with", "from", "have", "were", "been", "will", "what", "when", "where", "which",
    "their", "there", "these", "those", "into", "than", "then", "them", "also", "such", "each",
    "about", "would", "could", "should", "does", "being", "over", "only", "very", "just",
];

#[derive(Debug, Clone)]
pub struct GroundingConfig {
    pub threshold: f64,
    pub min_candidates: usize,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            min_candidates: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroundingReport {
    pub is_grounded: bool,
    pub confidence: f64,
    pub reference_score: f64,
    pub overlap_score: f64,
    pub key_sentences: usize,
    pub matched_sentences: usize,
    pub matched_markers: Vec<String>,
}

/// Refuse to generate from too few sources.
pub fn precheck(candidates: &[RetrievedCandidate], cfg: &GroundingConfig) -> Result<(), VaultError> {
    if candidates.len() < cfg.min_candidates {
        return Err(VaultError::InsufficientContext {
            available: candidates.len(),
            required: cfg.min_candidates,
        });
    }
    Ok(())
}

/// Score `answer` against the candidates and the prompt it was generated
/// from.
pub fn verify(
    answer: &str,
    candidates: &[RetrievedCandidate],
    prompt: &str,
    cfg: &GroundingConfig,
) -> GroundingReport {
    let answer_lower = answer.to_lowercase();
    let answer_words: HashSet<String> = words(&answer_lower).map(str::to_string).collect();
    // Space-joined words with sentinels, for whole-phrase title matching.
    let answer_phrase = format!(" {} ", words(&answer_lower).collect::<Vec<_>>().join(" "));

    let reference_score = if candidates.is_empty() {
        0.0
    } else {
        let referenced = candidates
            .iter()
            .filter(|c| is_referenced(c, &answer_phrase, &answer_words))
            .count();
        referenced as f64 / candidates.len() as f64
    };

    let prompt_lower = prompt.to_lowercase();
    let prompt_words = content_words(&prompt_lower);
    let mut key_sentences = 0;
    let mut matched_sentences = 0;
    for sentence in sentences(&answer_lower) {
        let sw = content_words(sentence);
        if sw.len() < KEY_SENTENCE_MIN_WORDS {
            continue;
        }
        key_sentences += 1;
        let shared = sw.iter().filter(|w| prompt_words.contains(*w)).count();
        if shared as f64 / sw.len() as f64 >= SENTENCE_MATCH_RATIO {
            matched_sentences += 1;
        }
    }
    let overlap_score = if key_sentences == 0 {
        0.0
    } else {
        matched_sentences as f64 / key_sentences as f64
    };

    let matched_markers: Vec<String> = HALLUCINATION_MARKERS
        .iter()
        .filter(|m| answer_lower.contains(*m))
        .map(|m| m.to_string())
        .collect();

    let mut confidence = REFERENCE_WEIGHT * reference_score + OVERLAP_WEIGHT * overlap_score;
    if !matched_markers.is_empty() {
        confidence *= MARKER_PENALTY;
    }
    let confidence = confidence.clamp(0.0, 1.0);

    GroundingReport {
        is_grounded: confidence >= cfg.threshold && candidates.len() >= cfg.min_candidates,
        confidence,
        reference_score,
        overlap_score,
        key_sentences,
        matched_sentences,
        matched_markers,
    }
}

/// Title (or its stem) as a word sequence, or the format name as a word.
fn is_referenced(c: &RetrievedCandidate, answer: &str, answer_words: &HashSet<String>) -> bool {
    let title = c.title.trim().to_lowercase();
    let stem = title.rsplit_once('.').map_or(title.as_str(), |(stem, _)| stem);
    [title.as_str(), stem]
        .into_iter()
        .map(|t| words(t).collect::<Vec<_>>().join(" "))
        .any(|phrase| phrase.len() >= MIN_WORD_LEN && answer.contains(&format!(" {} ", phrase)))
        || answer_words.contains(c.mime_class.as_str())
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn content_words(text: &str) -> HashSet<&str> {
    words(text)
        .filter(|w| w.chars().count() >= MIN_WORD_LEN && !STOP_WORDS.contains(w))
        .collect()
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
