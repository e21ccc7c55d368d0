//! Relevance evaluator: does a piece of evidence bear on the query?
//!
//! A keyword-overlap check is always available. When a chat model is
//! attached (and enabled in config) its verdict takes precedence; a model
//! failure is read as "relevant" so an outage never discards evidence.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::{with_timeout, ChatModel, PromptMessage};
use crate::parser::{term_overlap, truncate_chars};

const RELEVANCE_SYSTEM_PROMPT: &str = "You judge whether a passage helps answer a legal \
question about data protection or company policy. Reply with exactly one word: \
'relevant' or 'not_relevant'.";

/// Parsed model verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Relevant,
    NotRelevant,
    Unclear,
}

fn parse_verdict(reply: &str) -> Verdict {
    let normalized = reply.trim().to_lowercase().replace(['_', '-'], " ");
    let words: Vec<&str> = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let negated = words
        .windows(2)
        .any(|pair| pair == ["not", "relevant"]);

    if negated || words.contains(&"irrelevant") || words.first() == Some(&"no") {
        Verdict::NotRelevant
    } else if words.contains(&"relevant") || words.first() == Some(&"yes") {
        Verdict::Relevant
    } else {
        Verdict::Unclear
    }
}

/// Judges candidate evidence against a query.
pub struct RelevanceEvaluator {
    model: Option<Arc<dyn ChatModel>>,
    min_term_overlap: f32,
    max_candidate_chars: usize,
    timeout: Duration,
}

impl RelevanceEvaluator {
    /// Keyword-only evaluator.
    pub fn keyword(min_term_overlap: f32, max_candidate_chars: usize) -> Self {
        Self {
            model: None,
            min_term_overlap,
            max_candidate_chars,
            timeout: Duration::from_secs(60),
        }
    }

    /// Attach a chat model that is asked first.
    pub fn with_model(mut self, model: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        self.model = Some(model);
        self.timeout = timeout;
        self
    }

    pub fn uses_model(&self) -> bool {
        self.model.is_some()
    }

    /// Whether `candidate` is relevant to `query`.
    ///
    /// Empty candidates are never relevant. A query with no content terms
    /// cannot be judged by overlap and is treated as relevant.
    pub async fn is_relevant(&self, query: &str, candidate: &str) -> bool {
        if candidate.trim().is_empty() {
            return false;
        }

        if let Some(model) = &self.model {
            let excerpt = truncate_chars(candidate, self.max_candidate_chars);
            let messages = [
                PromptMessage::system(RELEVANCE_SYSTEM_PROMPT),
                PromptMessage::user(format!("Question: {}\n\nPassage:\n{}", query, excerpt)),
            ];
            match with_timeout(self.timeout, model.complete(&messages)).await {
                Ok(reply) => match parse_verdict(&reply) {
                    Verdict::Relevant => return true,
                    Verdict::NotRelevant => return false,
                    Verdict::Unclear => {
                        debug!(reply = %reply, "Unclear relevance verdict, using keyword overlap");
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Relevance model failed, keeping candidate");
                    return true;
                }
            }
        }

        self.keyword_relevant(query, candidate)
    }

    /// Keyword-overlap verdict alone.
    pub fn keyword_relevant(&self, query: &str, candidate: &str) -> bool {
        if candidate.trim().is_empty() {
            return false;
        }
        match term_overlap(query, candidate) {
            Some(score) => score >= self.min_term_overlap,
            None => true,
        }
    }
}
