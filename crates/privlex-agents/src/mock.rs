//! In-memory collaborators for tests and offline runs.
//!
//! These implement the backend traits with fixed, scriptable behaviour so the
//! pipeline can be exercised without a vector store, chat model or web search
//! provider. Every fake records the calls it receives.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{ChatModel, Embedder, PromptMessage, StoreHit, VectorStore, WebSearchProvider};
use crate::error::BackendError;
use crate::types::WebResult;

// =============================================================================
// StaticStore
// =============================================================================

/// Vector store returning canned hits per index.
///
/// Unknown indices return no hits. Hits are returned in the order given,
/// unfiltered, so callers' own filtering and sorting is exercised.
#[derive(Default)]
pub struct StaticStore {
    hits: HashMap<String, Vec<StoreHit>>,
    failures: HashMap<String, BackendError>,
    fail_all: Option<BackendError>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl StaticStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, index: &str, hits: Vec<StoreHit>) -> Self {
        self.hits.insert(index.to_string(), hits);
        self
    }

    /// Make searches against `index` fail with `error`.
    pub fn failing(mut self, index: &str, error: BackendError) -> Self {
        self.failures.insert(index.to_string(), error);
        self
    }

    /// Make every search fail with `error`.
    pub fn failing_all(mut self, error: BackendError) -> Self {
        self.fail_all = Some(error);
        self
    }

    /// Sleep before answering searches against `index`.
    pub fn with_delay(mut self, index: &str, delay: Duration) -> Self {
        self.delays.insert(index.to_string(), delay);
        self
    }

    /// `(index, query)` pairs searched so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl VectorStore for StaticStore {
    async fn search(
        &self,
        index: &str,
        query: &str,
        _k: usize,
        _score_threshold: f32,
    ) -> Result<Vec<StoreHit>, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((index.to_string(), query.to_string()));
        }
        if let Some(delay) = self.delays.get(index) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(err) = self.fail_all.as_ref().or_else(|| self.failures.get(index)) {
            return Err(err.clone());
        }
        Ok(self.hits.get(index).cloned().unwrap_or_default())
    }
}

// =============================================================================
// ScriptedChatModel
// =============================================================================

type Responder = dyn Fn(&[PromptMessage]) -> Result<String, BackendError> + Send + Sync;

/// Chat model whose replies come from a closure.
pub struct ScriptedChatModel {
    respond: Box<Responder>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedChatModel {
    pub fn from_fn<F>(respond: F) -> Self
    where
        F: Fn(&[PromptMessage]) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `text`.
    pub fn replying(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_fn(move |_| Ok(text.clone()))
    }

    /// Always fail with `error`.
    pub fn failing(error: BackendError) -> Self {
        Self::from_fn(move |_| Err(error.clone()))
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, BackendError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        (self.respond)(messages)
    }
}

// =============================================================================
// StaticWebSearch
// =============================================================================

/// Web search provider returning canned results or a fixed error.
pub struct StaticWebSearch {
    outcome: Result<Vec<WebResult>, BackendError>,
    queries: Mutex<Vec<String>>,
}

impl StaticWebSearch {
    pub fn with_results(results: Vec<WebResult>) -> Self {
        Self {
            outcome: Ok(results),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: BackendError) -> Self {
        Self {
            outcome: Err(error),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queries received, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl WebSearchProvider for StaticWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, BackendError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        let mut results = self.outcome.clone()?;
        results.truncate(max_results);
        Ok(results)
    }
}

// =============================================================================
// MockEmbedder
// =============================================================================

/// Deterministic embedder: hashes each word into a fixed-size bag-of-words
/// vector and L2-normalises it. Texts sharing words get positive cosine
/// similarity.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let slot = (hasher.finish() % self.dimension as u64) as usize;
            vector[slot] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        Ok(self.embed_sync(text))
    }
}
