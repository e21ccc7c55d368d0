//! Answer synthesis from corpus chunks, web results and session memory.
//!
//! Evidence is numbered once per distinct source (corpus + locator, or URL)
//! and the answer refers to it with `[n]` markers. Two paths produce text:
//!
//! - **generated**: the chat model writes the answer from the numbered
//!   evidence and the recent conversation; markers it invents are removed
//! - **extractive**: the answer is composed directly from the evidence,
//!   used when no model is attached or the model call fails
//!
//! Without any evidence the agent returns the explicit "insufficient
//! information" draft and never calls the model.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use privlex_core::types::{Citation, Message, Role};

use crate::backend::{with_timeout, ChatModel, PromptMessage};
use crate::parser::{has_anaphora, truncate_chars};
use crate::types::{AnswerDraft, RetrievalResult, SynthesisMode, WebResult};

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s?\[(\d+)\]").expect("Invalid citation marker regex"));

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a legal assistant specialised in data \
protection law (GDPR, Indonesia's UU PDP) and internal company policy. Answer the user's \
question using only the numbered sources provided. Cite every statement with the source \
number in square brackets, for example [1]. If the sources do not answer the question, \
say so plainly instead of guessing. When you rely on web sources, say that the answer is \
based on general legal information from the web.";

const WEB_ONLY_NOTE: &str = "Note: no matching passage was found in the regulation or \
policy collections; this answer is based on web search results.";

/// One numbered piece of evidence.
#[derive(Debug, Clone)]
struct Evidence {
    citation: Citation,
    /// Human-readable heading, e.g. `GDPR Art. 33`.
    heading: String,
    text: String,
}

/// Number evidence by distinct source: corpus chunks first (in the order
/// given), then web results. Chunks sharing a locator are merged.
fn number_evidence(corpus_results: &[RetrievalResult], web_results: &[WebResult]) -> Vec<Evidence> {
    let mut evidence: Vec<Evidence> = Vec::new();

    for result in corpus_results {
        for chunk in &result.chunks {
            let source = chunk.corpus.as_str();
            if let Some(existing) = evidence
                .iter_mut()
                .find(|e| e.citation.source == source && e.citation.locator == chunk.locator)
            {
                existing.text.push('\n');
                existing.text.push_str(chunk.text.trim());
                continue;
            }
            evidence.push(Evidence {
                citation: Citation::corpus(chunk.corpus, chunk.locator.clone(), String::new()),
                heading: format!("{} {}", chunk.corpus.display_name(), chunk.locator),
                text: chunk.text.trim().to_string(),
            });
        }
    }

    for web in web_results {
        if evidence
            .iter()
            .any(|e| e.citation.is_web() && e.citation.locator == web.url)
        {
            continue;
        }
        let heading = if web.title.trim().is_empty() {
            web.url.clone()
        } else {
            web.title.trim().to_string()
        };
        evidence.push(Evidence {
            citation: Citation::web(web.url.clone(), String::new()),
            heading,
            text: web.snippet.trim().to_string(),
        });
    }

    evidence
}

/// Writes cited answers.
pub struct SynthesisAgent {
    model: Option<Arc<dyn ChatModel>>,
    timeout: Duration,
    history_messages: usize,
    max_excerpt_chars: usize,
}

impl SynthesisAgent {
    /// Extractive-only agent.
    pub fn extractive(history_messages: usize, max_excerpt_chars: usize) -> Self {
        Self {
            model: None,
            timeout: Duration::from_secs(60),
            history_messages,
            max_excerpt_chars,
        }
    }

    /// Generate answers with `model`, falling back to extraction on failure.
    pub fn with_model(mut self, model: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        self.model = Some(model);
        self.timeout = timeout;
        self
    }

    pub fn uses_model(&self) -> bool {
        self.model.is_some()
    }

    /// Produce an answer to `query` grounded in the supplied evidence.
    ///
    /// `memory` is the session's recent history (oldest first), used for
    /// follow-up context. Every returned citation refers to evidence passed
    /// in here.
    pub async fn synthesize(
        &self,
        query: &str,
        corpus_results: &[RetrievalResult],
        web_results: &[WebResult],
        memory: &[Message],
    ) -> AnswerDraft {
        let evidence = number_evidence(corpus_results, web_results);
        if evidence.is_empty() {
            debug!("No evidence supplied, returning insufficient-information draft");
            return AnswerDraft::insufficient();
        }

        if let Some(model) = &self.model {
            let prompt = self.build_prompt(query, &evidence, memory);
            match with_timeout(self.timeout, model.complete(&prompt)).await {
                Ok(reply) if !reply.trim().is_empty() => {
                    return self.finish_generated(&reply, &evidence);
                }
                Ok(_) => warn!("Synthesis model returned an empty answer, composing extractively"),
                Err(e) => warn!(error = %e, "Synthesis model failed, composing extractively"),
            }
            let mut draft = self.compose_extractive(query, &evidence, memory);
            draft.mode = SynthesisMode::ExtractiveAfterModelFailure;
            return draft;
        }

        self.compose_extractive(query, &evidence, memory)
    }

    // -----------------------------------------------------------------
    // Generated path
    // -----------------------------------------------------------------

    fn build_prompt(
        &self,
        query: &str,
        evidence: &[Evidence],
        memory: &[Message],
    ) -> Vec<PromptMessage> {
        let mut messages = vec![PromptMessage::system(SYNTHESIS_SYSTEM_PROMPT)];

        let start = memory.len().saturating_sub(self.history_messages);
        messages.extend(memory[start..].iter().map(PromptMessage::from));

        let sources: Vec<String> = evidence
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let origin = if e.citation.is_web() {
                    format!("web, {}", e.citation.locator)
                } else {
                    e.citation.source.clone()
                };
                format!("[{}] {} ({})\n{}", i + 1, e.heading, origin, e.text)
            })
            .collect();

        messages.push(PromptMessage::user(format!(
            "Sources:\n\n{}\n\nQuestion: {}",
            sources.join("\n\n"),
            query
        )));
        messages
    }

    fn finish_generated(&self, reply: &str, evidence: &[Evidence]) -> AnswerDraft {
        let mut cited: BTreeMap<usize, Citation> = BTreeMap::new();
        let text = MARKER_RE
            .replace_all(reply.trim(), |caps: &regex::Captures<'_>| {
                let marker = caps
                    .get(1)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .filter(|n| (1..=evidence.len()).contains(n));
                match marker {
                    Some(n) => {
                        cited
                            .entry(n)
                            .or_insert_with(|| self.citation_for(&evidence[n - 1]));
                        caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default()
                    }
                    None => String::new(),
                }
            })
            .into_owned();

        if cited.is_empty() {
            debug!("Generated answer carried no valid markers, citing all evidence");
            cited = self.cite_all(evidence);
        }

        AnswerDraft {
            text,
            citations: cited,
            used_web_fallback: false,
            mode: SynthesisMode::Generated,
        }
    }

    // -----------------------------------------------------------------
    // Extractive path
    // -----------------------------------------------------------------

    fn compose_extractive(&self, query: &str, evidence: &[Evidence], memory: &[Message]) -> AnswerDraft {
        let body = if evidence.len() == 1 {
            format!(
                "According to {} [1]: {}",
                evidence[0].heading,
                truncate_chars(&evidence[0].text, self.max_excerpt_chars)
            )
        } else {
            let lines: Vec<String> = evidence
                .iter()
                .enumerate()
                .map(|(i, e)| {
                    format!(
                        "- {} [{}]: {}",
                        e.heading,
                        i + 1,
                        truncate_chars(&e.text, self.max_excerpt_chars)
                    )
                })
                .collect();
            format!("Here is what the sources say:\n{}", lines.join("\n"))
        };

        let mut text = match previous_question(query, memory) {
            Some(previous) => format!(
                "Following up on your earlier question (\"{}\"): {}",
                truncate_chars(previous, 120),
                body
            ),
            None => body,
        };

        if evidence.iter().all(|e| e.citation.is_web()) {
            text.push_str("\n\n");
            text.push_str(WEB_ONLY_NOTE);
        }

        AnswerDraft {
            text,
            citations: self.cite_all(evidence),
            used_web_fallback: false,
            mode: SynthesisMode::Extractive,
        }
    }

    fn cite_all(&self, evidence: &[Evidence]) -> BTreeMap<usize, Citation> {
        evidence
            .iter()
            .enumerate()
            .map(|(i, e)| (i + 1, self.citation_for(e)))
            .collect()
    }

    fn citation_for(&self, evidence: &Evidence) -> Citation {
        Citation {
            excerpt: truncate_chars(&evidence.text, self.max_excerpt_chars),
            ..evidence.citation.clone()
        }
    }
}

/// The last user question, when `query` refers back to it.
fn previous_question<'a>(query: &str, memory: &'a [Message]) -> Option<&'a str> {
    if !has_anaphora(query) {
        return None;
    }
    memory
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.text.as_str())
}
