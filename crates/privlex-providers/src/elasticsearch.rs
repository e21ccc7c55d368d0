//! Elasticsearch kNN vector store.
//!
//! Each corpus lives in its own index whose documents carry the chunk text,
//! a dense vector and an optional `metadata` object. The query is embedded
//! first, then sent as a `knn` search. With cosine similarity Elasticsearch
//! reports `(1 + cos) / 2`, so scores are already in `[0, 1]`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use privlex_agents::{BackendError, Embedder, StoreHit, VectorStore};
use privlex_core::config::ElasticsearchConfig;

use crate::http::{build_client, join_url, read_json, transport_error};

/// Candidates considered per shard for every requested hit.
const CANDIDATES_PER_HIT: usize = 10;
const MIN_CANDIDATES: usize = 50;

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}

pub struct ElasticsearchStore {
    client: Client,
    url: String,
    api_key: String,
    vector_field: String,
    text_field: String,
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl ElasticsearchStore {
    pub fn new(
        config: &ElasticsearchConfig,
        embedder: Arc<dyn Embedder>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        if !config.is_configured() {
            return Err(BackendError::NotConfigured(
                "elasticsearch url is required".to_string(),
            ));
        }
        Ok(Self {
            client: build_client(timeout)?,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            vector_field: config.vector_field.clone(),
            text_field: config.text_field.clone(),
            embedder,
            timeout,
        })
    }

    fn request_body(&self, vector: Vec<f32>, k: usize) -> Value {
        json!({
            "knn": {
                "field": self.vector_field,
                "query_vector": vector,
                "k": k,
                "num_candidates": (k * CANDIDATES_PER_HIT).max(MIN_CANDIDATES),
            },
            "size": k,
            "_source": [self.text_field, "metadata"],
        })
    }

    fn into_store_hit(&self, raw: RawHit) -> Option<StoreHit> {
        let mut source = raw.source;
        let text = match source.remove(&self.text_field) {
            Some(Value::String(text)) => text,
            _ => return None,
        };
        let metadata = match source.remove("metadata") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Some(StoreHit {
            text,
            metadata,
            score: raw.score.unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl VectorStore for ElasticsearchStore {
    async fn search(
        &self,
        index: &str,
        query: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<StoreHit>, BackendError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;

        let mut request = self
            .client
            .post(join_url(&self.url, &format!("{index}/_search")))
            .json(&self.request_body(vector, k));
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("ApiKey {}", self.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let parsed: SearchResponse = read_json(response, self.timeout).await?;

        let hits: Vec<StoreHit> = parsed
            .hits
            .hits
            .into_iter()
            .filter_map(|raw| self.into_store_hit(raw))
            .filter(|hit| hit.score >= score_threshold)
            .take(k)
            .collect();

        debug!(index = %index, hits = hits.len(), "elasticsearch search complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privlex_agents::mock::MockEmbedder;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(url: &str, api_key: &str) -> ElasticsearchStore {
        let config = ElasticsearchConfig {
            url: url.to_string(),
            api_key: api_key.to_string(),
            ..ElasticsearchConfig::default()
        };
        ElasticsearchStore::new(&config, Arc::new(MockEmbedder::new(8)), Duration::from_secs(5))
            .unwrap()
    }

    fn search_body() -> Value {
        json!({
            "hits": {
                "total": {"value": 3},
                "hits": [
                    {
                        "_score": 0.91,
                        "_source": {
                            "text": "notify the supervisory authority within 72 hours",
                            "metadata": {"article": "Art. 33"}
                        }
                    },
                    {"_score": 0.62, "_source": {"text": "records of processing"}},
                    {"_score": 0.31, "_source": {"text": "unrelated recital"}}
                ]
            }
        })
    }

    #[test]
    fn test_requires_url() {
        let result = ElasticsearchStore::new(
            &ElasticsearchConfig::default(),
            Arc::new(MockEmbedder::default()),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(BackendError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_knn_search_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gdpr/_search"))
            .and(header("Authorization", "ApiKey abc"))
            .and(body_partial_json(json!({
                "knn": {"field": "vector", "k": 3, "num_candidates": 50},
                "size": 3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .expect(1)
            .mount(&server)
            .await;

        let hits = store(&server.uri(), "abc")
            .search("gdpr", "breach notification deadline", 3, 0.5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata["article"], "Art. 33");
        assert!((hits[0].score - 0.91).abs() < 1e-6);
        assert!(hits[1].metadata.is_empty());
    }

    #[tokio::test]
    async fn test_hits_without_text_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pdp/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": {"hits": [
                    {"_score": 0.9, "_source": {"metadata": {}}},
                    {"_score": 0.8, "_source": {"text": "Pasal 46 notification"}}
                ]}
            })))
            .mount(&server)
            .await;

        let hits = store(&server.uri(), "").search("pdp", "q", 3, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "Pasal 46 notification");
    }

    #[tokio::test]
    async fn test_missing_index_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("index_not_found_exception"))
            .mount(&server)
            .await;

        let err = store(&server.uri(), "")
            .search("company", "q", 3, 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_zero_k_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let hits = store(&server.uri(), "").search("gdpr", "q", 0, 0.5).await.unwrap();
        assert!(hits.is_empty());
    }
}
