//! Corpus retriever: top-k similarity search over one corpus.

use std::sync::Arc;

use tracing::debug;

use privlex_core::types::CorpusTag;

use crate::backend::{StoreHit, VectorStore};
use crate::error::BackendError;
use crate::parser::article_reference;
use crate::types::{Chunk, RetrievalResult};

/// Metadata keys checked, in order, for a human-readable locator.
const LOCATOR_KEYS: &[&str] = &["locator", "article", "section", "url", "filename", "source"];

/// Searches a single corpus index.
#[derive(Clone)]
pub struct CorpusRetriever {
    tag: CorpusTag,
    index: String,
    store: Arc<dyn VectorStore>,
}

impl CorpusRetriever {
    pub fn new(tag: CorpusTag, index: impl Into<String>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            tag,
            index: index.into(),
            store,
        }
    }

    pub fn tag(&self) -> CorpusTag {
        self.tag
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Fetch up to `k` chunks scoring at least `score_threshold`, highest
    /// score first. Hits with empty text or a non-finite score are dropped.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<RetrievalResult, BackendError> {
        if k == 0 {
            return Ok(RetrievalResult::empty(self.tag));
        }

        let hits = self.store.search(&self.index, query, k, score_threshold).await?;
        let raw_count = hits.len();

        let mut chunks: Vec<Chunk> = hits
            .into_iter()
            .enumerate()
            .filter(|(_, hit)| {
                hit.score.is_finite() && hit.score >= score_threshold && !hit.text.trim().is_empty()
            })
            .map(|(i, hit)| self.to_chunk(i, hit))
            .collect();

        // Stable, so equal scores keep store order.
        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
        chunks.truncate(k);

        debug!(
            corpus = %self.tag,
            raw = raw_count,
            kept = chunks.len(),
            "Corpus retrieval complete"
        );

        Ok(RetrievalResult {
            corpus: self.tag,
            chunks,
        })
    }

    fn to_chunk(&self, position: usize, hit: StoreHit) -> Chunk {
        let locator = locator_from_metadata(&hit.metadata)
            .or_else(|| article_reference(&hit.text))
            .unwrap_or_else(|| format!("chunk {}", position + 1));
        Chunk {
            text: hit.text,
            corpus: self.tag,
            locator,
            score: hit.score,
            metadata: hit.metadata,
        }
    }
}

fn locator_from_metadata(metadata: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    LOCATOR_KEYS.iter().find_map(|key| match metadata.get(*key) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::StaticStore;

    fn retriever(store: StaticStore) -> CorpusRetriever {
        CorpusRetriever::new(CorpusTag::Gdpr, "gdpr", Arc::new(store))
    }

    #[tokio::test]
    async fn test_filters_below_threshold() {
        let store = StaticStore::new().with_hits(
            "gdpr",
            vec![
                StoreHit::new("high", 0.9),
                StoreHit::new("low", 0.3),
                StoreHit::new("edge", 0.5),
            ],
        );
        let result = retriever(store).retrieve("q", 3, 0.5).await.unwrap();
        let texts: Vec<&str> = result.chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["high", "edge"]);
        assert!(result.chunks.iter().all(|c| c.corpus == CorpusTag::Gdpr));
    }

    #[tokio::test]
    async fn test_sorted_and_truncated_to_k() {
        let store = StaticStore::new().with_hits(
            "gdpr",
            vec![
                StoreHit::new("b", 0.6),
                StoreHit::new("a", 0.95),
                StoreHit::new("c", 0.8),
                StoreHit::new("d", 0.7),
            ],
        );
        let result = retriever(store).retrieve("q", 2, 0.0).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.chunks[0].text, "a");
        assert_eq!(result.chunks[1].text, "c");
        assert_eq!(result.top_score(), Some(0.95));
    }

    #[tokio::test]
    async fn test_drops_empty_text_and_nan() {
        let store = StaticStore::new().with_hits(
            "gdpr",
            vec![
                StoreHit::new("  ", 0.9),
                StoreHit::new("nan", f32::NAN),
                StoreHit::new("ok", 0.9),
            ],
        );
        let result = retriever(store).retrieve("q", 3, 0.5).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.chunks[0].text, "ok");
    }

    #[tokio::test]
    async fn test_zero_k_skips_store() {
        let store = Arc::new(StaticStore::new().with_hits("gdpr", vec![StoreHit::new("x", 0.9)]));
        let r = CorpusRetriever::new(CorpusTag::Gdpr, "gdpr", store.clone());
        assert!(r.retrieve("q", 0, 0.5).await.unwrap().is_empty());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_locator_resolution() {
        let store = StaticStore::new().with_hits(
            "gdpr",
            vec![
                StoreHit::new("meta", 0.9).with_meta("article", "Art. 33"),
                StoreHit::new("Article 17 gives the right to erasure", 0.8),
                StoreHit::new("plain text", 0.7),
            ],
        );
        let result = retriever(store).retrieve("q", 3, 0.5).await.unwrap();
        assert_eq!(result.chunks[0].locator, "Art. 33");
        assert_eq!(result.chunks[1].locator, "Art. 17");
        assert_eq!(result.chunks[2].locator, "chunk 3");
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let store = StaticStore::new().failing("gdpr", BackendError::Connection("down".into()));
        let err = retriever(store).retrieve("q", 3, 0.5).await.unwrap_err();
        assert_eq!(err, BackendError::Connection("down".into()));
    }
}
