//! Token-bounded prompt assembly.
//!
//! [`allocate`] turns the user message, retrieved candidates, conversation
//! history and corpus statistics into [`ContextItem`]s and packs them into a
//! fixed token budget:
//!
//! | Tier | Source | Packing |
//! |------|--------|---------|
//! | Critical | current user message | always included (truncated only if it alone exceeds the budget) |
//! | High | retrieved documents | balanced: even split of the remaining budget; otherwise greedy |
//! | Medium | last N history turns | greedy, newest first |
//! | Low | corpus statistics | greedy |
//!
//! The sum of included token counts never exceeds the budget.

use serde::Serialize;

use crate::chunk::{estimate_tokens, CHARS_PER_TOKEN};
use crate::models::{ChatRole, ChatTurn, ContextItem, PriorityTier, RetrievedCandidate, SourceKind};

/// Appended when a High item had to be hard-cut.
pub const TRUNCATION_MARKER: &str = " [...]";

/// A sentence-boundary cut is used only if it keeps at least this share of
/// the allotted length.
const SENTENCE_KEEP_RATIO: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub budget_tokens: usize,
    /// Trailing history turns considered (N).
    pub history_turns: usize,
    pub balanced: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            budget_tokens: 4000,
            history_turns: 6,
            balanced: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AllocationInput<'a> {
    pub user_message: &'a str,
    pub candidates: &'a [RetrievedCandidate],
    pub history: &'a [ChatTurn],
    pub corpus_stats: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub included: usize,
    pub excluded: usize,
    pub truncated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierBreakdown {
    pub critical: TierStats,
    pub high: TierStats,
    pub medium: TierStats,
    pub low: TierStats,
}

impl TierBreakdown {
    pub fn get(&self, tier: PriorityTier) -> &TierStats {
        match tier {
            PriorityTier::Critical => &self.critical,
            PriorityTier::High => &self.high,
            PriorityTier::Medium => &self.medium,
            PriorityTier::Low => &self.low,
        }
    }

    fn get_mut(&mut self, tier: PriorityTier) -> &mut TierStats {
        match tier {
            PriorityTier::Critical => &mut self.critical,
            PriorityTier::High => &mut self.high,
            PriorityTier::Medium => &mut self.medium,
            PriorityTier::Low => &mut self.low,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationMetadata {
    pub budget_tokens: usize,
    pub tokens_used: usize,
    pub utilization_pct: f64,
    pub balanced: bool,
    pub tiers: TierBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub prompt: String,
    /// Included items in prompt order.
    pub items: Vec<ContextItem>,
    pub metadata: AllocationMetadata,
}

/// An item plus its position in the rendered prompt.
struct Slot {
    order: usize,
    item: ContextItem,
}

fn item(content: String, tier: PriorityTier, kind: SourceKind, source_id: &str) -> ContextItem {
    ContextItem {
        token_count: estimate_tokens(&content),
        content,
        tier,
        source_kind: kind,
        source_id: source_id.to_string(),
    }
}

/// Pack the input into `cfg.budget_tokens`.
pub fn allocate(input: &AllocationInput<'_>, cfg: &AllocatorConfig) -> Allocation {
    let budget = cfg.budget_tokens;
    let mut tiers = TierBreakdown::default();
    let mut included: Vec<Slot> = Vec::new();

    // Render order: corpus stats, documents, history, user message.
    let low: Vec<Slot> = input
        .corpus_stats
        .filter(|s| !s.trim().is_empty())
        .map(|s| Slot {
            order: 0,
            item: item(
                format!("Corpus: {}", s),
                PriorityTier::Low,
                SourceKind::Metadata,
                "corpus",
            ),
        })
        .into_iter()
        .collect();

    let high: Vec<Slot> = input
        .candidates
        .iter()
        .enumerate()
        .map(|(i, c)| Slot {
            order: 1 + i,
            item: item(
                format!("[{}]\n{}", c.title, c.snippet),
                PriorityTier::High,
                SourceKind::Document,
                &c.document_id,
            ),
        })
        .collect();

    let window_start = input.history.len().saturating_sub(cfg.history_turns);
    tiers.medium.excluded += window_start;
    let history_base = 1 + high.len();
    let mut medium: Vec<Slot> = input.history[window_start..]
        .iter()
        .enumerate()
        .map(|(i, turn)| {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            Slot {
                order: history_base + i,
                item: item(
                    format!("{}: {}", role, turn.content),
                    PriorityTier::Medium,
                    SourceKind::History,
                    &format!("history:{}", window_start + i),
                ),
            }
        })
        .collect();
    // Greedy packing keeps the most recent turns first.
    medium.reverse();

    let mut critical = Slot {
        order: history_base + medium.len(),
        item: item(
            input.user_message.to_string(),
            PriorityTier::Critical,
            SourceKind::UserMessage,
            "user",
        ),
    };
    if critical.item.token_count > budget {
        let cut = hard_cut(input.user_message, budget);
        critical.item.token_count = estimate_tokens(&cut);
        critical.item.content = cut;
        tiers.critical.truncated += 1;
    }
    tiers.critical.included += 1;
    let mut remaining = budget.saturating_sub(critical.item.token_count);
    included.push(critical);

    if cfg.balanced && !high.is_empty() {
        let share = remaining / high.len();
        for mut slot in high {
            let stats = tiers.get_mut(PriorityTier::High);
            if slot.item.token_count <= share {
                stats.included += 1;
            } else {
                match truncate_to_tokens(&slot.item.content, share) {
                    Some(cut) => {
                        slot.item.token_count = estimate_tokens(&cut);
                        slot.item.content = cut;
                        stats.included += 1;
                        stats.truncated += 1;
                    }
                    None => {
                        stats.excluded += 1;
                        continue;
                    }
                }
            }
            remaining -= slot.item.token_count;
            included.push(slot);
        }
    } else {
        pack_greedy(high, &mut remaining, &mut tiers, &mut included);
    }
    pack_greedy(medium, &mut remaining, &mut tiers, &mut included);
    pack_greedy(low, &mut remaining, &mut tiers, &mut included);

    included.sort_by_key(|s| s.order);
    let items: Vec<ContextItem> = included.into_iter().map(|s| s.item).collect();
    let tokens_used: usize = items.iter().map(|i| i.token_count).sum();
    let prompt = items
        .iter()
        .map(|i| i.content.as_str())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let utilization_pct = if budget == 0 {
        0.0
    } else {
        tokens_used as f64 / budget as f64 * 100.0
    };

    Allocation {
        prompt,
        items,
        metadata: AllocationMetadata {
            budget_tokens: budget,
            tokens_used,
            utilization_pct,
            balanced: cfg.balanced,
            tiers,
        },
    }
}

fn pack_greedy(
    slots: Vec<Slot>,
    remaining: &mut usize,
    tiers: &mut TierBreakdown,
    included: &mut Vec<Slot>,
) {
    for slot in slots {
        let stats = tiers.get_mut(slot.item.tier);
        if slot.item.token_count <= *remaining {
            *remaining -= slot.item.token_count;
            stats.included += 1;
            included.push(slot);
        } else {
            stats.excluded += 1;
        }
    }
}

/// Shorten `text` to at most `max_tokens`.
///
/// Prefers the last sentence boundary when that keeps at least 70% of the
/// allotted length; otherwise hard-cuts and appends [`TRUNCATION_MARKER`].
/// Returns `None` when not even the marker fits.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> Option<String> {
    if estimate_tokens(text) <= max_tokens {
        return Some(text.to_string());
    }
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    if max_chars == 0 {
        return None;
    }

    let prefix = char_prefix(text, max_chars);
    let min_keep = (max_chars as f64 * SENTENCE_KEEP_RATIO).ceil() as usize;
    if let Some(end) = last_sentence_end(prefix) {
        let kept = prefix[..end].trim_end();
        if kept.chars().count() >= min_keep {
            return Some(kept.to_string());
        }
    }

    let marker_chars = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_chars {
        return None;
    }
    let mut cut = char_prefix(text, max_chars - marker_chars).trim_end().to_string();
    cut.push_str(TRUNCATION_MARKER);
    Some(cut)
}

/// Plain cut to `max_tokens`, no marker. Used for the Critical message,
/// which must be included whatever its size.
fn hard_cut(text: &str, max_tokens: usize) -> String {
    char_prefix(text, max_tokens * CHARS_PER_TOKEN).to_string()
}

/// The first `n` characters of `s`.
fn char_prefix(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Byte offset just past the last sentence terminator followed by
/// whitespace (or the end of `s`), or the last newline.
fn last_sentence_end(s: &str) -> Option<usize> {
    let mut last = None;
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let next_is_break = chars.peek().map_or(true, |(_, n)| n.is_whitespace());
        match c {
            '.' | '!' | '?' if next_is_break => last = Some(i + c.len_utf8()),
            '\n' if i > 0 => last = Some(i),
            _ => {}
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MimeClass, Provenance};

    fn candidate(id: &str, snippet: &str) -> RetrievedCandidate {
        RetrievedCandidate {
            document_id: id.to_string(),
            score: 1.0,
            snippet: snippet.to_string(),
            provenance: Provenance::Both,
            title: format!("Doc {}", id),
            mime_class: MimeClass::Text,
            updated_at: 0,
        }
    }

    fn turn(role: ChatRole, content: &str) -> ChatTurn {
        ChatTurn {
            role,
            content: content.to_string(),
        }
    }

    fn cfg(budget: usize, balanced: bool) -> AllocatorConfig {
        AllocatorConfig {
            budget_tokens: budget,
            history_turns: 6,
            balanced,
        }
    }

    fn long_snippet(words: usize) -> String {
        (0..words)
            .map(|i| format!("Sentence number {} talks about revenue.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn budget_is_never_exceeded_and_critical_always_included() {
        let candidates: Vec<_> = (0..5)
            .map(|i| candidate(&format!("d{}", i), &long_snippet(10 + i * 7)))
            .collect();
        let history: Vec<_> = (0..10)
            .map(|i| turn(ChatRole::User, &format!("previous question {}", i)))
            .collect();
        let input = AllocationInput {
            user_message: "What was revenue in Q3?",
            candidates: &candidates,
            history: &history,
            corpus_stats: Some("5 documents, 3 formats"),
        };
        for balanced in [true, false] {
            for budget in [0, 1, 3, 10, 50, 120, 400, 2000, 10_000] {
                let out = allocate(&input, &cfg(budget, balanced));
                let sum: usize = out.items.iter().map(|i| i.token_count).sum();
                assert!(sum <= budget, "budget {} balanced {}: used {}", budget, balanced, sum);
                assert_eq!(out.metadata.tokens_used, sum);
                assert!(out
                    .items
                    .iter()
                    .any(|i| i.tier == PriorityTier::Critical));
                assert_eq!(out.metadata.tiers.critical.included, 1);
            }
        }
    }

    #[test]
    fn oversized_critical_message_is_cut_to_fit() {
        let msg = "x".repeat(100);
        let input = AllocationInput {
            user_message: &msg,
            candidates: &[],
            history: &[],
            corpus_stats: None,
        };
        let out = allocate(&input, &cfg(10, true));
        assert_eq!(out.metadata.tokens_used, 10);
        assert_eq!(out.metadata.tiers.critical.truncated, 1);
        assert_eq!(out.prompt.len(), 40);
    }

    #[test]
    fn balanced_mode_splits_evenly() {
        let candidates: Vec<_> = (0..3)
            .map(|i| candidate(&format!("d{}", i), &long_snippet(20)))
            .collect();
        let input = AllocationInput {
            user_message: "hi?",
            candidates: &candidates,
            history: &[],
            corpus_stats: None,
        };
        let out = allocate(&input, &cfg(91, true));
        let high = out.metadata.tiers.high;
        assert_eq!(high.included, 3);
        assert_eq!(high.truncated, 3);
        for it in out.items.iter().filter(|i| i.tier == PriorityTier::High) {
            assert!(it.token_count <= 30);
        }
    }

    #[test]
    fn greedy_mode_takes_whole_items_in_order() {
        let snippet = "a".repeat(180);
        let candidates: Vec<_> = (0..3).map(|i| candidate(&format!("d{}", i), &snippet)).collect();
        let input = AllocationInput {
            user_message: "hi?",
            candidates: &candidates,
            history: &[],
            corpus_stats: None,
        };
        // Each document item is 48 tokens; 90 left after the message.
        let out = allocate(&input, &cfg(91, false));
        let high = out.metadata.tiers.high;
        assert_eq!(high.included, 1);
        assert_eq!(high.excluded, 2);
        assert_eq!(high.truncated, 0);
        let doc = out.items.iter().find(|i| i.tier == PriorityTier::High).unwrap();
        assert_eq!(doc.source_id, "d0");
    }

    #[test]
    fn history_is_windowed_and_newest_wins() {
        let history: Vec<_> = (0..10)
            .map(|i| turn(ChatRole::Assistant, &format!("turn {:02} {}", i, "z".repeat(20))))
            .collect();
        let input = AllocationInput {
            user_message: "q",
            candidates: &[],
            history: &history,
            corpus_stats: None,
        };
        let out = allocate(&input, &cfg(25, true));
        let medium = out.metadata.tiers.medium;
        assert_eq!(medium.included + medium.excluded, 10);
        assert!(medium.included >= 1);
        // The newest turn is kept, and rendered before the user message.
        assert!(out.prompt.contains("turn 09"));
        assert!(!out.prompt.contains("turn 03"));
        assert!(out.prompt.ends_with("q"));
    }

    #[test]
    fn leftover_budget_flows_to_medium_then_low() {
        let candidates = vec![candidate("d0", "short")];
        let history = vec![turn(ChatRole::User, "earlier")];
        let input = AllocationInput {
            user_message: "now",
            candidates: &candidates,
            history: &history,
            corpus_stats: Some("1 document"),
        };
        let out = allocate(&input, &cfg(500, true));
        assert_eq!(out.items.len(), 4);
        assert_eq!(out.metadata.tiers.medium.included, 1);
        assert_eq!(out.metadata.tiers.low.included, 1);
        assert!(out.prompt.starts_with("Corpus: 1 document"));
        assert!(out.metadata.utilization_pct > 0.0 && out.metadata.utilization_pct < 100.0);
    }

    #[test]
    fn truncation_prefers_sentence_boundary() {
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta iota kappa lambda.";
        // 8 tokens = 32 chars; the boundary at 23 chars keeps >= 70%.
        assert_eq!(
            truncate_to_tokens(text, 8).as_deref(),
            Some("Alpha beta gamma delta.")
        );
    }

    #[test]
    fn truncation_hard_cuts_when_boundary_too_early() {
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta iota kappa lambda.";
        // 10 tokens = 40 chars; boundary at 23 < 28, so hard cut with marker.
        let cut = truncate_to_tokens(text, 10).unwrap();
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert!(cut.chars().count() <= 40);
        assert!(estimate_tokens(&cut) <= 10);
    }

    #[test]
    fn truncation_gives_up_when_marker_does_not_fit() {
        assert_eq!(truncate_to_tokens("abcdefghijklmnop", 1), None);
        assert_eq!(truncate_to_tokens("abc", 1).as_deref(), Some("abc"));
    }
}
