//! Per-request data flowing between pipeline stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use privlex_core::types::{Citation, CorpusTag};

/// Literal marker present in every answer that could not be grounded.
pub const INSUFFICIENT_INFORMATION: &str = "insufficient information";

// =============================================================================
// Evidence
// =============================================================================

/// A retrieved passage. Its score is only comparable to other chunks from the
/// same corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub corpus: CorpusTag,
    /// Article, section or file identifier.
    pub locator: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Chunks retrieved from one corpus, highest score first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub corpus: CorpusTag,
    pub chunks: Vec<Chunk>,
}

impl RetrievalResult {
    pub fn empty(corpus: CorpusTag) -> Self {
        Self {
            corpus,
            chunks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn top_score(&self) -> Option<f32> {
        self.chunks.first().map(|c| c.score)
    }
}

/// One web search hit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

impl WebResult {
    pub fn new(title: impl Into<String>, snippet: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            snippet: snippet.into(),
            url: url.into(),
        }
    }
}

// =============================================================================
// Routing
// =============================================================================

/// How the router arrived at its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMethod {
    /// The chat-model classifier picked the corpora.
    Classifier,
    /// Corpus keywords matched the query.
    Keyword,
    /// Corpora carried over from earlier turns in the session.
    FollowUp,
    /// Nothing matched; every known corpus is queried.
    Default,
    /// The classifier backend failed; every known corpus is queried.
    ClassifierFailed,
}

/// Ordered, non-empty set of corpora to query for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    corpora: Vec<CorpusTag>,
    web_requested: bool,
    method: RouteMethod,
}

impl RouteDecision {
    /// Build a decision, dropping duplicate tags. Returns `None` when no tag
    /// is given.
    pub fn new(corpora: impl IntoIterator<Item = CorpusTag>, method: RouteMethod) -> Option<Self> {
        let mut unique: Vec<CorpusTag> = Vec::new();
        for tag in corpora {
            if !unique.contains(&tag) {
                unique.push(tag);
            }
        }
        if unique.is_empty() {
            None
        } else {
            Some(Self {
                corpora: unique,
                web_requested: false,
                method,
            })
        }
    }

    /// Build a decision from tags the caller knows to be non-empty and unique.
    pub(crate) fn new_unchecked(corpora: Vec<CorpusTag>, method: RouteMethod) -> Self {
        Self {
            corpora,
            web_requested: false,
            method,
        }
    }

    /// Mark that the query asked for fresh web results.
    pub fn with_web_requested(mut self, requested: bool) -> Self {
        self.web_requested = requested;
        self
    }

    pub fn corpora(&self) -> &[CorpusTag] {
        &self.corpora
    }

    pub fn web_requested(&self) -> bool {
        self.web_requested
    }

    pub fn method(&self) -> RouteMethod {
        self.method
    }

    pub fn contains(&self, tag: CorpusTag) -> bool {
        self.corpora.contains(&tag)
    }
}

// =============================================================================
// Retrieval outcome
// =============================================================================

/// Verdict of the sufficiency check over the combined corpus evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sufficiency {
    Sufficient,
    /// Every routed corpus failed or timed out.
    AllCorporaFailed,
    NoEvidence,
    TooFewChunks,
    /// No chunk reached its corpus's strong-match threshold.
    NoStrongMatch,
    /// Strong matches exist but none was judged relevant to the query.
    NotRelevant,
}

impl Sufficiency {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, Sufficiency::Sufficient)
    }
}

/// Result of a web search attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebStatus {
    /// The provider answered (possibly with nothing relevant).
    Completed,
    /// The provider errored or timed out.
    ProviderFailed,
    /// No web search provider is configured.
    Disabled,
}

/// Filtered web results plus whether the provider answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebSearchOutcome {
    pub results: Vec<WebResult>,
    pub status: WebStatus,
}

/// Everything the fallback controller collected for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatherOutcome {
    /// One entry per routed corpus, in route order. Failed corpora are empty.
    pub results: Vec<RetrievalResult>,
    pub used_web_fallback: bool,
    pub web_results: Vec<WebResult>,
    pub failed_corpora: Vec<CorpusTag>,
    pub sufficiency: Sufficiency,
    /// `None` when web search was not needed.
    pub web_status: Option<WebStatus>,
}

impl GatherOutcome {
    pub fn total_chunks(&self) -> usize {
        self.results.iter().map(RetrievalResult::len).sum()
    }

    pub fn all_corpora_failed(&self) -> bool {
        !self.results.is_empty() && self.failed_corpora.len() >= self.results.len()
    }
}

// =============================================================================
// Answers
// =============================================================================

/// How the synthesis agent produced its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Written by the chat model from the numbered evidence.
    Generated,
    /// Composed directly from the evidence; no model configured.
    Extractive,
    /// Composed directly from the evidence after the model call failed.
    ExtractiveAfterModelFailure,
    /// No evidence was supplied.
    Insufficient,
}

/// A synthesized answer before it is committed to memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerDraft {
    pub text: String,
    /// Citation marker (`[n]` in the text) to the cited evidence.
    pub citations: BTreeMap<usize, Citation>,
    pub used_web_fallback: bool,
    pub mode: SynthesisMode,
}

impl AnswerDraft {
    /// The explicit "insufficient information" draft.
    pub fn insufficient() -> Self {
        Self {
            text: format!(
                "I have {} to answer this question from the available regulations, \
                 company policies, or web sources. Please rephrase it or add more detail.",
                INSUFFICIENT_INFORMATION
            ),
            citations: BTreeMap::new(),
            used_web_fallback: false,
            mode: SynthesisMode::Insufficient,
        }
    }

    pub fn with_web_fallback(mut self, used: bool) -> Self {
        self.used_web_fallback = used;
        self
    }

    pub fn is_insufficient(&self) -> bool {
        self.mode == SynthesisMode::Insufficient
    }

    /// Citations in marker order.
    pub fn citation_list(&self) -> Vec<Citation> {
        self.citations.values().cloned().collect()
    }
}

/// The caller-facing answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub used_web_fallback: bool,
}

impl From<AnswerDraft> for Answer {
    fn from(draft: AnswerDraft) -> Self {
        Self {
            citations: draft.citation_list(),
            text: draft.text,
            used_web_fallback: draft.used_web_fallback,
        }
    }
}
