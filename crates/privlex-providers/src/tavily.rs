//! Tavily web search API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use privlex_agents::{BackendError, WebResult, WebSearchProvider};
use privlex_core::config::TavilyConfig;

use crate::http::{build_client, read_json, transport_error};

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    search_depth: &'a str,
    max_results: usize,
    include_answer: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawResult>,
}

#[derive(Deserialize)]
struct RawResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: String,
}

pub struct TavilySearch {
    client: Client,
    url: String,
    api_key: String,
    search_depth: String,
    timeout: Duration,
}

impl TavilySearch {
    pub fn new(
        config: &TavilyConfig,
        search_depth: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        if !config.is_configured() {
            return Err(BackendError::NotConfigured(
                "tavily url and api key are required".to_string(),
            ));
        }
        Ok(Self {
            client: build_client(timeout)?,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            search_depth: search_depth.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl WebSearchProvider for TavilySearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebResult>, BackendError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let body = SearchRequest {
            query,
            search_depth: &self.search_depth,
            max_results,
            include_answer: true,
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let parsed: SearchResponse = read_json(response, self.timeout).await?;
        let results: Vec<WebResult> = parsed
            .results
            .into_iter()
            .take(max_results)
            .map(|r| WebResult::new(r.title, r.content, r.url))
            .collect();

        debug!(results = results.len(), "tavily search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn search(server: &MockServer) -> TavilySearch {
        let config = TavilyConfig {
            url: format!("{}/search", server.uri()),
            api_key: "tvly-key".to_string(),
        };
        TavilySearch::new(&config, "advanced", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let result = TavilySearch::new(&TavilyConfig::default(), "basic", Duration::from_secs(1));
        assert!(matches!(result, Err(BackendError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_search_request_and_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("Authorization", "Bearer tvly-key"))
            .and(body_partial_json(json!({
                "query": "latest GDPR fines",
                "search_depth": "advanced",
                "max_results": 3,
                "include_answer": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "Several large fines were issued.",
                "results": [
                    {"title": "GDPR fines tracker", "content": "Fines in 2024 ...", "url": "https://example.org/fines"},
                    {"content": "untitled", "url": "https://example.org/other"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let results = search(&server).search("latest GDPR fines", 3).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "GDPR fines tracker");
        assert_eq!(results[0].snippet, "Fines in 2024 ...");
        assert_eq!(results[0].url, "https://example.org/fines");
        assert_eq!(results[1].title, "");
    }

    #[tokio::test]
    async fn test_unauthorized_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "bad key"})))
            .mount(&server)
            .await;

        let err = search(&server).search("q", 3).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_results_truncated_to_max() {
        let server = MockServer::start().await;
        let many: Vec<_> = (0..5)
            .map(|i| json!({"title": format!("t{i}"), "content": "c", "url": format!("https://e.org/{i}")}))
            .collect();
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": many})))
            .mount(&server)
            .await;

        let results = search(&server).search("q", 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
