//! Contracts for the external collaborators the pipeline depends on.
//!
//! Every collaborator is an async trait object so production code can plug in
//! HTTP clients (see `privlex-providers`) while tests use the scripted fakes in
//! [`crate::mock`]. All calls made through these traits are wrapped in
//! [`with_timeout`] by the component that issues them.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use privlex_core::types::{Message, Role};

use crate::error::BackendError;
use crate::types::WebResult;

/// One raw hit returned by a vector store, in store order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreHit {
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub score: f32,
}

impl StoreHit {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            metadata: serde_json::Map::new(),
            score,
        }
    }

    /// Attach one metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Similarity search over one index per corpus.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `k` hits for `query` from `index`. Implementations may
    /// pre-filter by `score_threshold`; callers filter again regardless.
    async fn search(
        &self,
        index: &str,
        query: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<StoreHit>, BackendError>;
}

/// Text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

/// Speaker of a prompt message sent to a chat model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// A single chat-completion message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for PromptMessage {
    fn from(message: &Message) -> Self {
        match message.role {
            Role::User => PromptMessage::user(message.text.clone()),
            Role::Assistant => PromptMessage::assistant(message.text.clone()),
        }
    }
}

/// Chat completion model. Output is not required to be deterministic.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, BackendError>;
}

/// Open web search.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// Return at most `max_results` results in provider ranking order.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<WebResult>, BackendError>;
}

/// Run a collaborator call with an enforced deadline.
///
/// An elapsed deadline becomes [`BackendError::Timeout`], so callers treat a
/// slow collaborator exactly like a failing one.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}
