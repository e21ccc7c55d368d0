//! Lightweight text analysis shared by the router, relevance evaluator,
//! follow-up resolver and synthesis agent.
//!
//! Everything here is pure and allocation-light: content-term extraction,
//! keyword-phrase matching, anaphora detection and article references.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

// =============================================================================
// Compiled patterns (compiled once, reused across calls)
// =============================================================================

static ARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:art(?:icle)?\.?|pasal|section|sec\.|clause)\s*(\d+[a-z]?(?:\(\d+\))?)")
        .expect("Invalid article regex")
});

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("Invalid word regex"));

/// Follow-up shapes. A pronoun only counts when it leads the question, sits
/// right after the opening auxiliary or question word, or closes the
/// question as an object. Relative "that" ("data that we store") and
/// expletive "is it" ("is it lawful to ...") are not references.
static ANAPHORA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)",
        // "what about ...", "and how about ...", "and under ...", "and what ..."
        r"^\s*(?:and\s+|but\s+)?(?:what|how)\s+about\b",
        r"|^\s*and\s+(?:for|under|in|what|how|does|do|is|are|can)\b",
        // "its exceptions?", "that applies to processors too?"
        r"|^\s*(?:its|their|they|those|these|that|this|the\s+same)\b",
        // "does that apply ...", "can it be ...", "are they ..."
        r"|^\s*(?:does|do|did|can|could|would|will|should|must|may|has|have)\s+(?:it|that|this|they|these|those|the\s+same)\b",
        r"|^\s*(?:is|are|was|were)\s+(?:that|they|those|the\s+same)\b",
        // "what are its exceptions?", "how long is their retention?"
        r"|^\s*(?:what|which|how|when|where|why|who)\s+(?:\w+\s+){0,2}?(?:its|their)\b",
        // "how does it work?", "what is that?"
        r"|^\s*(?:what|which|how|when|where|why|who)\s+(?:does|do|did|can|could|would|will|should)\s+(?:it|that|this|they)\b",
        r"|^\s*(?:what|which|how|when|where|why|who)\s+(?:is|are|was|were)\s+(?:that|this|they)\b",
        // "are there exceptions to it?", "what are the fines for that?"
        r"|\b(?:to|of|about|for|under|with|on|in|from|apply|applies|cover|covers|mean|means)\s+(?:it|that|this|them|those|these)\s*[?.!]*\s*$",
    ))
    .expect("Invalid anaphora regex")
});

static STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "am", "be", "been", "being",
    "have", "has", "had", "do", "does", "did", "will", "would", "shall", "should",
    "may", "might", "must", "can", "could", "i", "me", "my", "we", "our", "you",
    "your", "he", "she", "it", "they", "them", "his", "her", "its", "their",
    "what", "which", "who", "whom", "this", "that", "these", "those", "of", "in",
    "to", "for", "with", "on", "at", "from", "by", "about", "as", "into", "under",
    "and", "but", "or", "not", "no", "so", "if", "then", "than", "too", "very",
    "just", "also", "any", "some", "how", "when", "where", "why", "there", "same",
    "tell", "explain", "please", "regarding", "according", "say", "says",
    "yang", "dan", "di", "ke", "dari", "apa", "untuk", "dengan", "ini", "itu",
];

/// Length of the shared prefix used as a crude stem when comparing terms.
const STEM_LEN: usize = 5;

// =============================================================================
// Terms
// =============================================================================

/// Lowercased content words of `text`, with stop words and one-character
/// tokens removed. Order of first appearance is kept; duplicates dropped.
pub fn content_terms(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut terms = Vec::new();
    for m in WORD_RE.find_iter(text) {
        let word = m.as_str().to_lowercase();
        if word.chars().count() < 2 && !word.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            terms.push(word);
        }
    }
    terms
}

fn stem(term: &str) -> String {
    term.chars().take(STEM_LEN).collect()
}

/// Fraction of `query`'s content terms that also occur (by stem) in
/// `candidate`. Returns `None` when the query has no content terms.
pub fn term_overlap(query: &str, candidate: &str) -> Option<f32> {
    let query_terms = content_terms(query);
    if query_terms.is_empty() {
        return None;
    }
    let candidate_stems: BTreeSet<String> =
        content_terms(candidate).iter().map(|t| stem(t)).collect();
    let hits = query_terms
        .iter()
        .filter(|t| candidate_stems.contains(&stem(t)))
        .count();
    Some(hits as f32 / query_terms.len() as f32)
}

// =============================================================================
// Phrase matching
// =============================================================================

/// Lowercase `text`, turn every non-alphanumeric run into a single space and
/// pad both ends, so whole-phrase matches can use plain substring search.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

/// True when any of `phrases` occurs in `text` as whole words, ignoring case
/// and punctuation ("undang-undang" matches "Undang Undang").
pub fn mentions_any<S: AsRef<str>>(text: &str, phrases: &[S]) -> bool {
    let haystack = normalize(text);
    phrases.iter().any(|p| {
        let needle = normalize(p.as_ref());
        !needle.trim().is_empty() && haystack.contains(&needle)
    })
}

// =============================================================================
// Anaphora and references
// =============================================================================

/// True when the query leans on an earlier turn ("what about its
/// exceptions?", "does that apply in Indonesia too?").
pub fn has_anaphora(query: &str) -> bool {
    ANAPHORA_RE.is_match(query)
}

/// First article/section reference in `text`, normalised as `Art. 33`.
pub fn article_reference(text: &str) -> Option<String> {
    ARTICLE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| format!("Art. {}", m.as_str()))
}

/// Cut `text` to at most `max_chars` characters on a char boundary,
/// appending an ellipsis when shortened.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
