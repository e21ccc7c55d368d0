//! Multi-agent answer pipeline for legal privacy questions.
//!
//! Routes a question to the relevant regulation and policy corpora, retrieves
//! evidence in parallel, falls back to web search when the evidence is thin,
//! and writes a cited answer while keeping per-session conversation memory.

pub mod backend;
pub mod context;
pub mod error;
pub mod fallback;
pub mod memory;
pub mod mock;
pub mod orchestrator;
pub mod parser;
pub mod relevance;
pub mod retriever;
pub mod router;
pub mod synthesis;
pub mod types;
pub mod web;

pub use backend::{
    with_timeout, ChatModel, Embedder, PromptMessage, PromptRole, StoreHit, VectorStore,
    WebSearchProvider,
};
pub use context::{FollowUpResolver, ResolvedQuery};
pub use error::{AgentError, BackendError};
pub use fallback::{CorpusThresholds, FallbackController};
pub use memory::MemoryStore;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, Stage, StageTracker};
pub use relevance::RelevanceEvaluator;
pub use retriever::CorpusRetriever;
pub use router::{CorpusRoute, QueryRouter};
pub use synthesis::SynthesisAgent;
pub use types::{
    Answer, AnswerDraft, Chunk, GatherOutcome, RetrievalResult, RouteDecision, RouteMethod,
    Sufficiency, SynthesisMode, WebResult, WebSearchOutcome, WebStatus, INSUFFICIENT_INFORMATION,
};
pub use web::WebSearchAgent;
