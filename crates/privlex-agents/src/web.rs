//! Web search agent: provider call plus relevance filtering.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::backend::{with_timeout, WebSearchProvider};
use crate::relevance::RelevanceEvaluator;
use crate::types::{WebResult, WebSearchOutcome, WebStatus};

/// Wraps a [`WebSearchProvider`] and keeps only relevant, distinct results.
pub struct WebSearchAgent {
    provider: Arc<dyn WebSearchProvider>,
    relevance: Arc<RelevanceEvaluator>,
    max_results: usize,
    timeout: Duration,
}

impl WebSearchAgent {
    pub fn new(
        provider: Arc<dyn WebSearchProvider>,
        relevance: Arc<RelevanceEvaluator>,
        max_results: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            relevance,
            max_results,
            timeout,
        }
    }

    /// Relevant results for `query`, in provider order. Provider failures
    /// yield an empty list.
    pub async fn search_and_filter(&self, query: &str) -> Vec<WebResult> {
        self.search(query).await.results
    }

    /// Like [`search_and_filter`](Self::search_and_filter) but also reports
    /// whether the provider answered.
    pub async fn search(&self, query: &str) -> WebSearchOutcome {
        if self.max_results == 0 {
            return WebSearchOutcome {
                results: Vec::new(),
                status: WebStatus::Completed,
            };
        }

        let raw = match with_timeout(self.timeout, self.provider.search(query, self.max_results))
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Web search failed");
                return WebSearchOutcome {
                    results: Vec::new(),
                    status: WebStatus::ProviderFailed,
                };
            }
        };
        let raw_count = raw.len();

        let mut seen = HashSet::new();
        let candidates: Vec<WebResult> = raw
            .into_iter()
            .take(self.max_results)
            .filter(|r| !r.url.trim().is_empty() && seen.insert(r.url.trim().to_string()))
            .collect();

        let verdicts = join_all(candidates.iter().map(|r| {
            let text = format!("{}\n{}", r.title, r.snippet);
            async move { self.relevance.is_relevant(query, &text).await }
        }))
        .await;

        let results: Vec<WebResult> = candidates
            .into_iter()
            .zip(verdicts)
            .filter_map(|(r, keep)| keep.then_some(r))
            .collect();

        debug!(raw = raw_count, kept = results.len(), "Web search filtered");
        WebSearchOutcome {
            results,
            status: WebStatus::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::mock::StaticWebSearch;

    fn agent(provider: StaticWebSearch, max_results: usize) -> WebSearchAgent {
        WebSearchAgent::new(
            Arc::new(provider),
            Arc::new(RelevanceEvaluator::keyword(0.2, 1000)),
            max_results,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_filters_irrelevant_and_keeps_order() {
        let provider = StaticWebSearch::with_results(vec![
            WebResult::new("GDPR breach rules", "Notify within 72 hours", "https://a.test"),
            WebResult::new("Recipes", "Bake bread at home", "https://b.test"),
            WebResult::new("Breach notification guide", "Deadlines explained", "https://c.test"),
        ]);
        let results = agent(provider, 3)
            .search_and_filter("GDPR breach notification deadline")
            .await;
        let urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test", "https://c.test"]);
    }

    #[tokio::test]
    async fn test_dedupes_urls_and_drops_missing() {
        let provider = StaticWebSearch::with_results(vec![
            WebResult::new("breach", "breach", "https://a.test"),
            WebResult::new("breach again", "breach", "https://a.test"),
            WebResult::new("breach", "breach", ""),
        ]);
        let results = agent(provider, 3).search_and_filter("breach").await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_caps_at_max_results() {
        let provider = StaticWebSearch::with_results(
            (0..5)
                .map(|i| WebResult::new("breach", "breach", format!("https://{}.test", i)))
                .collect(),
        );
        let results = agent(provider, 2).search_and_filter("breach").await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_empty() {
        let provider = StaticWebSearch::failing(BackendError::Status {
            status: 401,
            body: "bad key".into(),
        });
        let outcome = agent(provider, 3).search("breach").await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.status, WebStatus::ProviderFailed);
    }

    #[tokio::test]
    async fn test_query_forwarded() {
        let provider = Arc::new(StaticWebSearch::with_results(vec![]));
        let agent = WebSearchAgent::new(
            provider.clone(),
            Arc::new(RelevanceEvaluator::keyword(0.2, 1000)),
            3,
            Duration::from_secs(5),
        );
        let outcome = agent.search("latest fines").await;
        assert_eq!(outcome.status, WebStatus::Completed);
        assert_eq!(provider.queries(), vec!["latest fines".to_string()]);
    }
}
