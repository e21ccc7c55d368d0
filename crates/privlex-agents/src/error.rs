//! Error types for the answer pipeline.

use std::time::Duration;

use privlex_core::error::PrivlexError;

use crate::orchestrator::Stage;

/// Failure reported by an external collaborator (vector store, chat model,
/// embedding model, web search provider).
///
/// Components absorb these according to their fallback policy; only the
/// orchestrator decides whether a combination of them is fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("query exceeds maximum length of {0} characters")]
    QueryTooLong(usize),
    #[error("session id cannot be empty")]
    EmptySessionId,
    #[error("no corpora configured")]
    NoCorpora,
    #[error("memory error: {0}")]
    Memory(String),
    #[error("all backends unavailable: {0}")]
    AllBackendsUnavailable(String),
    #[error("invalid stage transition: {from:?} -> {to:?}")]
    InvalidStageTransition { from: Stage, to: Stage },
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<PrivlexError> for AgentError {
    fn from(err: PrivlexError) -> Self {
        AgentError::Config(err.to_string())
    }
}
