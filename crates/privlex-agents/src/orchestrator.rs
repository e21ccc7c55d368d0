//! Orchestrator: the public entry point of the answer pipeline.
//!
//! One request walks a fixed sequence of stages:
//! Route -> Retrieve -> Evaluate -> [WebFallback] -> Synthesize -> UpdateMemory -> Done
//!
//! Any stage may move to Error, which like Done is terminal. Memory is
//! touched only in UpdateMemory, so a failed request leaves the session
//! history exactly as it was.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use privlex_core::config::PrivlexConfig;
use privlex_core::types::{CorpusTag, Message};

use crate::backend::{ChatModel, VectorStore, WebSearchProvider};
use crate::context::FollowUpResolver;
use crate::error::AgentError;
use crate::fallback::{CorpusThresholds, FallbackController};
use crate::memory::MemoryStore;
use crate::relevance::RelevanceEvaluator;
use crate::retriever::CorpusRetriever;
use crate::router::{CorpusRoute, QueryRouter};
use crate::synthesis::SynthesisAgent;
use crate::types::{Answer, RouteMethod, SynthesisMode, WebStatus};
use crate::web::WebSearchAgent;

// =============================================================================
// Stage machine
// =============================================================================

/// Pipeline stage of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Route,
    Retrieve,
    Evaluate,
    WebFallback,
    Synthesize,
    UpdateMemory,
    Done,
    Error,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Route => "route",
            Stage::Retrieve => "retrieve",
            Stage::Evaluate => "evaluate",
            Stage::WebFallback => "web_fallback",
            Stage::Synthesize => "synthesize",
            Stage::UpdateMemory => "update_memory",
            Stage::Done => "done",
            Stage::Error => "error",
        };
        f.write_str(name)
    }
}

/// Validate that a stage transition is allowed.
///
/// Valid transitions:
/// - Route -> Retrieve
/// - Retrieve -> Evaluate
/// - Evaluate -> WebFallback
/// - Evaluate -> Synthesize
/// - WebFallback -> Synthesize
/// - Synthesize -> UpdateMemory
/// - UpdateMemory -> Done
/// - any non-terminal stage -> Error
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), AgentError> {
    let valid = matches!(
        (from, to),
        (Stage::Route, Stage::Retrieve)
            | (Stage::Retrieve, Stage::Evaluate)
            | (Stage::Evaluate, Stage::WebFallback)
            | (Stage::Evaluate, Stage::Synthesize)
            | (Stage::WebFallback, Stage::Synthesize)
            | (Stage::Synthesize, Stage::UpdateMemory)
            | (Stage::UpdateMemory, Stage::Done)
    ) || (to == Stage::Error && !from.is_terminal());

    if valid {
        Ok(())
    } else {
        Err(AgentError::InvalidStageTransition { from, to })
    }
}

/// Records the stages one request passes through.
#[derive(Debug, Clone)]
pub struct StageTracker {
    visited: Vec<Stage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            visited: vec![Stage::Route],
        }
    }

    pub fn current(&self) -> Stage {
        self.visited.last().copied().unwrap_or(Stage::Route)
    }

    pub fn advance(&mut self, to: Stage) -> Result<(), AgentError> {
        let from = self.current();
        validate_transition(from, to)?;
        debug!("Pipeline stage: {} -> {}", from, to);
        self.visited.push(to);
        Ok(())
    }

    /// Move to [`Stage::Error`] unless already terminal.
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.visited.push(Stage::Error);
        }
    }

    pub fn visited(&self) -> &[Stage] {
        &self.visited
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.visited
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Sequences router, fallback controller, synthesis agent and memory.
pub struct Orchestrator {
    router: QueryRouter,
    fallback: FallbackController,
    synthesis: SynthesisAgent,
    memory: Arc<MemoryStore>,
    resolver: FollowUpResolver,
    recent_window: usize,
    max_query_chars: usize,
    has_model: bool,
}

impl Orchestrator {
    /// Start building an orchestrator from configuration.
    pub fn builder(config: PrivlexConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Answer `query` within `session_id`.
    ///
    /// Returns either a cited answer (possibly the "insufficient information"
    /// answer) or an error. On error the session history is unchanged.
    pub async fn answer(&self, session_id: &str, query: &str) -> Result<Answer, AgentError> {
        self.answer_with_trace(session_id, query).await.0
    }

    /// Like [`answer`](Self::answer), also returning the stages visited.
    pub async fn answer_with_trace(
        &self,
        session_id: &str,
        query: &str,
    ) -> (Result<Answer, AgentError>, Vec<Stage>) {
        let mut tracker = StageTracker::new();
        let result = self.run(&mut tracker, session_id, query).await;
        if let Err(ref e) = result {
            warn!(session_id = %session_id, error = %e, "Request failed");
            tracker.fail();
        }
        (result, tracker.into_stages())
    }

    async fn run(
        &self,
        tracker: &mut StageTracker,
        session_id: &str,
        query: &str,
    ) -> Result<Answer, AgentError> {
        let query = self.validate(session_id, query)?;

        // Route
        let recent = self.memory.recent(session_id, self.recent_window)?;
        let resolved = self.resolver.resolve(query, &recent);
        if let Some(topic) = &resolved.topic {
            debug!(topic = %topic, "Follow-up resolved against session history");
        }
        let route = self.router.route(&resolved.effective, &recent).await;
        info!(
            session_id = %session_id,
            corpora = ?route.corpora(),
            method = ?route.method(),
            web_requested = route.web_requested(),
            "Query routed"
        );

        // Retrieve, Evaluate, [WebFallback]
        let gathered = self
            .fallback
            .gather_observed(&route, &resolved.effective, |stage| tracker.advance(stage))
            .await?;

        // Synthesize
        tracker.advance(Stage::Synthesize)?;
        let draft = self
            .synthesis
            .synthesize(query, &gathered.results, &gathered.web_results, &recent)
            .await;

        let all_corpora_failed = gathered.all_corpora_failed();
        let web_unreachable = matches!(
            gathered.web_status,
            Some(WebStatus::ProviderFailed) | Some(WebStatus::Disabled)
        );
        let model_unreachable = !self.has_model
            || route.method() == RouteMethod::ClassifierFailed
            || draft.mode == SynthesisMode::ExtractiveAfterModelFailure;
        if all_corpora_failed && web_unreachable && model_unreachable {
            let failed_names: Vec<&str> = gathered
                .failed_corpora
                .iter()
                .map(CorpusTag::as_str)
                .collect();
            return Err(AgentError::AllBackendsUnavailable(format!(
                "corpora [{}] failed, web search unavailable, no chat model reachable",
                failed_names.join(", ")
            )));
        }

        let draft = draft.with_web_fallback(gathered.used_web_fallback);
        let answer = Answer::from(draft);

        // Update memory
        tracker.advance(Stage::UpdateMemory)?;
        self.memory.append_turn(
            session_id,
            Message::user(query),
            Message::assistant(answer.text.clone(), answer.citations.clone()),
        )?;

        tracker.advance(Stage::Done)?;
        info!(
            session_id = %session_id,
            citations = answer.citations.len(),
            used_web_fallback = answer.used_web_fallback,
            "Answer ready"
        );
        Ok(answer)
    }

    fn validate<'q>(&self, session_id: &str, query: &'q str) -> Result<&'q str, AgentError> {
        if session_id.trim().is_empty() {
            return Err(AgentError::EmptySessionId);
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(AgentError::EmptyQuery);
        }
        if query.chars().count() > self.max_query_chars {
            return Err(AgentError::QueryTooLong(self.max_query_chars));
        }
        Ok(query)
    }

    /// Forget a session's history. Idempotent.
    pub fn reset_session(&self, session_id: &str) -> Result<(), AgentError> {
        self.memory.reset(session_id)?;
        info!(session_id = %session_id, "Session reset");
        Ok(())
    }

    /// Full history of a session, oldest first.
    pub fn history(&self, session_id: &str) -> Result<Vec<Message>, AgentError> {
        self.memory.history(session_id)
    }

    /// Number of sessions holding history.
    pub fn session_count(&self) -> Result<usize, AgentError> {
        self.memory.session_count()
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Wires collaborators into an [`Orchestrator`] according to configuration.
pub struct OrchestratorBuilder {
    config: PrivlexConfig,
    store: Option<Arc<dyn VectorStore>>,
    corpus_stores: HashMap<CorpusTag, Arc<dyn VectorStore>>,
    chat_model: Option<Arc<dyn ChatModel>>,
    web_search: Option<Arc<dyn WebSearchProvider>>,
    memory: Option<Arc<MemoryStore>>,
}

impl OrchestratorBuilder {
    pub fn new(config: PrivlexConfig) -> Self {
        Self {
            config,
            store: None,
            corpus_stores: HashMap::new(),
            chat_model: None,
            web_search: None,
            memory: None,
        }
    }

    /// Vector store used for every corpus without its own store.
    pub fn store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Vector store for one corpus.
    pub fn corpus_store(mut self, tag: CorpusTag, store: Arc<dyn VectorStore>) -> Self {
        self.corpus_stores.insert(tag, store);
        self
    }

    pub fn chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.chat_model = Some(model);
        self
    }

    pub fn web_search(mut self, provider: Arc<dyn WebSearchProvider>) -> Self {
        self.web_search = Some(provider);
        self
    }

    /// Share an existing memory store instead of creating a fresh one.
    pub fn memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let config = self.config;
        config.validate()?;
        if config.corpora.is_empty() {
            return Err(AgentError::NoCorpora);
        }

        let model_timeout = config.timeouts.model();

        let mut relevance = RelevanceEvaluator::keyword(
            config.relevance.min_term_overlap,
            config.relevance.max_candidate_chars,
        );
        if let (true, Some(model)) = (config.relevance.use_model, &self.chat_model) {
            relevance = relevance.with_model(Arc::clone(model), model_timeout);
        }
        let relevance = Arc::new(relevance);

        let mut router = QueryRouter::new(config.corpora.iter().map(CorpusRoute::from).collect())?
            .with_recency_keywords(config.router.recency_keywords.clone());
        if let (true, Some(model)) = (config.router.use_model, &self.chat_model) {
            router = router.with_model(Arc::clone(model), model_timeout);
        }

        let mut fallback = FallbackController::new(
            Arc::clone(&relevance),
            config.retrieval.k,
            config.retrieval.min_total_chunks,
            config.timeouts.retrieval(),
        );
        for corpus in &config.corpora {
            let store = self
                .corpus_stores
                .get(&corpus.tag)
                .or(self.store.as_ref())
                .cloned()
                .ok_or_else(|| {
                    AgentError::Config(format!("no vector store for corpus '{}'", corpus.tag))
                })?;
            let thresholds = CorpusThresholds {
                score_threshold: corpus.effective_score_threshold(&config.retrieval),
                strong_match_threshold: corpus.effective_strong_match_threshold(&config.retrieval),
            };
            fallback = fallback.with_corpus(
                CorpusRetriever::new(corpus.tag, corpus.index.clone(), store),
                thresholds,
            );
        }
        match (&self.web_search, config.web_search.enabled) {
            (Some(provider), true) => {
                fallback = fallback.with_web_search(WebSearchAgent::new(
                    Arc::clone(provider),
                    Arc::clone(&relevance),
                    config.web_search.max_results,
                    config.timeouts.web_search(),
                ));
            }
            (Some(_), false) => info!("Web search disabled in configuration"),
            (None, _) => debug!("No web search provider attached"),
        }

        let mut synthesis = SynthesisAgent::extractive(
            config.synthesis.history_messages,
            config.synthesis.max_excerpt_chars,
        );
        if let (true, Some(model)) = (config.synthesis.use_model, &self.chat_model) {
            synthesis = synthesis.with_model(Arc::clone(model), model_timeout);
        }

        let has_model = self.chat_model.is_some()
            && (config.router.use_model || config.synthesis.use_model || config.relevance.use_model);

        info!(
            corpora = config.corpora.len(),
            chat_model = has_model,
            web_search = fallback.has_web_search(),
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            router,
            fallback,
            synthesis,
            memory: self.memory.unwrap_or_default(),
            resolver: FollowUpResolver,
            recent_window: config
                .memory
                .recent_window
                .max(config.synthesis.history_messages),
            max_query_chars: config.synthesis.max_query_chars,
            has_model,
        })
    }
}
