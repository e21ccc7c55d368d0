//! Fallback controller: parallel corpus retrieval, sufficiency check and
//! web-search supplement.
//!
//! Every routed corpus is searched concurrently, each branch under its own
//! deadline. A branch that errors or times out contributes an empty result
//! and is listed in [`GatherOutcome::failed_corpora`]; it never aborts the
//! other branches. Web results are added on top of whatever the corpora
//! returned, never instead of them.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use privlex_core::types::CorpusTag;

use crate::backend::with_timeout;
use crate::orchestrator::Stage;
use crate::relevance::RelevanceEvaluator;
use crate::retriever::CorpusRetriever;
use crate::types::{
    GatherOutcome, RetrievalResult, RouteDecision, Sufficiency, WebResult, WebStatus,
};
use crate::web::WebSearchAgent;

/// Score cutoffs for one corpus. Scores from different stores are not on a
/// common scale, so each corpus carries its own pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorpusThresholds {
    /// Chunks below this are discarded by the retriever.
    pub score_threshold: f32,
    /// A chunk at or above this counts as a strong match.
    pub strong_match_threshold: f32,
}

struct CorpusSlot {
    retriever: CorpusRetriever,
    thresholds: CorpusThresholds,
}

/// Coordinates retrieval across corpora and decides when to search the web.
pub struct FallbackController {
    corpora: BTreeMap<CorpusTag, CorpusSlot>,
    k: usize,
    min_total_chunks: usize,
    retrieval_timeout: Duration,
    relevance: Arc<RelevanceEvaluator>,
    web: Option<WebSearchAgent>,
}

impl FallbackController {
    pub fn new(
        relevance: Arc<RelevanceEvaluator>,
        k: usize,
        min_total_chunks: usize,
        retrieval_timeout: Duration,
    ) -> Self {
        Self {
            corpora: BTreeMap::new(),
            k,
            min_total_chunks,
            retrieval_timeout,
            relevance,
            web: None,
        }
    }

    /// Register the retriever for one corpus, replacing any earlier one.
    pub fn with_corpus(mut self, retriever: CorpusRetriever, thresholds: CorpusThresholds) -> Self {
        self.corpora.insert(
            retriever.tag(),
            CorpusSlot {
                retriever,
                thresholds,
            },
        );
        self
    }

    pub fn with_web_search(mut self, agent: WebSearchAgent) -> Self {
        self.web = Some(agent);
        self
    }

    pub fn has_web_search(&self) -> bool {
        self.web.is_some()
    }

    /// Retrieve from the routed corpora, judge sufficiency and supplement with
    /// web results when needed.
    pub async fn gather(&self, route: &RouteDecision, query: &str) -> GatherOutcome {
        match self
            .gather_observed(route, query, |_| Ok::<(), Infallible>(()))
            .await
        {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }

    /// [`gather`](Self::gather), calling `on_stage` as each of
    /// [`Stage::Retrieve`], [`Stage::Evaluate`] and (when the fallback fires)
    /// [`Stage::WebFallback`] begins. An error from `on_stage` stops the
    /// gather and is returned as is.
    pub async fn gather_observed<E>(
        &self,
        route: &RouteDecision,
        query: &str,
        mut on_stage: impl FnMut(Stage) -> Result<(), E>,
    ) -> Result<GatherOutcome, E> {
        on_stage(Stage::Retrieve)?;
        let (results, failed_corpora) = self.retrieve_all(route, query).await;

        on_stage(Stage::Evaluate)?;
        let sufficiency = self.assess(query, &results, &failed_corpora).await;
        debug!(sufficiency = ?sufficiency, "Corpus evidence assessed");

        if !self.should_search_web(route, sufficiency) {
            debug!("Corpus evidence sufficient, skipping web search");
            return Ok(GatherOutcome {
                results,
                used_web_fallback: false,
                web_results: Vec::new(),
                failed_corpora,
                sufficiency,
                web_status: None,
            });
        }

        on_stage(Stage::WebFallback)?;
        let (web_results, web_status) = self.search_web(query).await;
        info!(results = web_results.len(), status = ?web_status, "Web fallback finished");
        Ok(GatherOutcome {
            results,
            used_web_fallback: true,
            web_results,
            failed_corpora,
            sufficiency,
            web_status: Some(web_status),
        })
    }

    /// Fallback fires on any insufficient verdict (including every corpus
    /// failing), or when the route asked for web results and a provider is
    /// configured.
    pub fn should_search_web(&self, route: &RouteDecision, sufficiency: Sufficiency) -> bool {
        !sufficiency.is_sufficient() || (route.web_requested() && self.web.is_some())
    }

    /// Run the web supplement. Without a provider this reports
    /// [`WebStatus::Disabled`] and no results.
    pub async fn search_web(&self, query: &str) -> (Vec<WebResult>, WebStatus) {
        match &self.web {
            Some(agent) => {
                info!("Searching the web to supplement corpus evidence");
                let outcome = agent.search(query).await;
                (outcome.results, outcome.status)
            }
            None => {
                debug!("Web fallback needed but no provider configured");
                (Vec::new(), WebStatus::Disabled)
            }
        }
    }

    /// Query every routed corpus concurrently. Returns one result per routed
    /// corpus in route order, plus the corpora that failed.
    pub async fn retrieve_all(
        &self,
        route: &RouteDecision,
        query: &str,
    ) -> (Vec<RetrievalResult>, Vec<CorpusTag>) {
        let branches = route.corpora().iter().map(|&tag| async move {
            let Some(slot) = self.corpora.get(&tag) else {
                warn!(corpus = %tag, "Routed corpus has no retriever");
                return (RetrievalResult::empty(tag), false);
            };
            let call = slot
                .retriever
                .retrieve(query, self.k, slot.thresholds.score_threshold);
            match with_timeout(self.retrieval_timeout, call).await {
                Ok(result) => (result, true),
                Err(e) => {
                    warn!(corpus = %tag, error = %e, "Corpus retrieval failed");
                    (RetrievalResult::empty(tag), false)
                }
            }
        });

        let mut results = Vec::with_capacity(route.corpora().len());
        let mut failed = Vec::new();
        for (result, ok) in join_all(branches).await {
            if !ok {
                failed.push(result.corpus);
            }
            results.push(result);
        }
        (results, failed)
    }

    /// Decide whether the corpus evidence can answer `query` on its own.
    pub async fn assess(
        &self,
        query: &str,
        results: &[RetrievalResult],
        failed: &[CorpusTag],
    ) -> Sufficiency {
        if !results.is_empty() && failed.len() >= results.len() {
            return Sufficiency::AllCorporaFailed;
        }

        let total: usize = results.iter().map(RetrievalResult::len).sum();
        if total == 0 {
            return Sufficiency::NoEvidence;
        }
        if total < self.min_total_chunks {
            return Sufficiency::TooFewChunks;
        }

        let strong: Vec<&str> = results
            .iter()
            .flat_map(|r| {
                let cutoff = self.strong_match_threshold(r.corpus);
                r.chunks
                    .iter()
                    .filter(move |c| c.score >= cutoff)
                    .map(|c| c.text.as_str())
            })
            .collect();
        if strong.is_empty() {
            return Sufficiency::NoStrongMatch;
        }

        for text in strong {
            if self.relevance.is_relevant(query, text).await {
                return Sufficiency::Sufficient;
            }
        }
        Sufficiency::NotRelevant
    }

    fn strong_match_threshold(&self, tag: CorpusTag) -> f32 {
        self.corpora
            .get(&tag)
            .map(|slot| slot.thresholds.strong_match_threshold)
            .unwrap_or(f32::INFINITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StoreHit;
    use crate::error::BackendError;
    use crate::mock::{StaticStore, StaticWebSearch};
    use crate::types::RouteMethod;

    const THRESHOLDS: CorpusThresholds = CorpusThresholds {
        score_threshold: 0.5,
        strong_match_threshold: 0.75,
    };

    fn relevance() -> Arc<RelevanceEvaluator> {
        Arc::new(RelevanceEvaluator::keyword(0.2, 1000))
    }

    fn controller(store: Arc<StaticStore>) -> FallbackController {
        let mut c = FallbackController::new(relevance(), 3, 1, Duration::from_millis(200));
        for tag in CorpusTag::ALL {
            c = c.with_corpus(
                CorpusRetriever::new(tag, tag.as_str(), store.clone()),
                THRESHOLDS,
            );
        }
        c
    }

    fn web_agent(provider: StaticWebSearch) -> WebSearchAgent {
        WebSearchAgent::new(Arc::new(provider), relevance(), 3, Duration::from_secs(1))
    }

    fn route(tags: &[CorpusTag]) -> RouteDecision {
        RouteDecision::new(tags.iter().copied(), RouteMethod::Keyword).unwrap()
    }

    const QUERY: &str = "GDPR breach notification deadline";

    // -------------------------------------------------------------------
    // Sufficient evidence
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_strong_relevant_match_skips_web() {
        let store = Arc::new(StaticStore::new().with_hits(
            "gdpr",
            vec![StoreHit::new(
                "Controllers shall notify a personal data breach within 72 hours.",
                0.82,
            )],
        ));
        let web = Arc::new(StaticWebSearch::with_results(vec![]));
        let c = controller(store).with_web_search(WebSearchAgent::new(
            web.clone(),
            relevance(),
            3,
            Duration::from_secs(1),
        ));

        let outcome = c.gather(&route(&[CorpusTag::Gdpr]), QUERY).await;
        assert_eq!(outcome.sufficiency, Sufficiency::Sufficient);
        assert!(!outcome.used_web_fallback);
        assert!(outcome.web_status.is_none());
        assert_eq!(outcome.total_chunks(), 1);
        assert!(web.queries().is_empty());
    }

    #[tokio::test]
    async fn test_gather_observed_reports_stages_in_order() {
        let store = Arc::new(StaticStore::new().with_hits(
            "gdpr",
            vec![StoreHit::new("Records of processing activities.", 0.6)],
        ));
        let c = controller(store)
            .with_web_search(web_agent(StaticWebSearch::with_results(vec![])));

        let mut seen = Vec::new();
        let outcome = c
            .gather_observed(&route(&[CorpusTag::Gdpr]), QUERY, |stage| {
                seen.push(stage);
                Ok::<(), ()>(())
            })
            .await
            .unwrap();
        assert!(outcome.used_web_fallback);
        assert_eq!(seen, vec![Stage::Retrieve, Stage::Evaluate, Stage::WebFallback]);
    }

    #[tokio::test]
    async fn test_gather_observed_stops_on_hook_error() {
        let store = Arc::new(StaticStore::new());
        let c = controller(store.clone());

        let result = c
            .gather_observed(&route(&[CorpusTag::Gdpr]), QUERY, |stage| {
                if stage == Stage::Retrieve {
                    Err("rejected")
                } else {
                    Ok(())
                }
            })
            .await;
        assert_eq!(result.err(), Some("rejected"));
        assert_eq!(store.call_count(), 0);
    }

    // -------------------------------------------------------------------
    // Insufficient evidence
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_weak_match_triggers_web_and_keeps_chunks() {
        let store = Arc::new(StaticStore::new().with_hits(
            "gdpr",
            vec![StoreHit::new("A data breach must be documented.", 0.6)],
        ));
        let c = controller(store).with_web_search(web_agent(StaticWebSearch::with_results(vec![
            WebResult::new("Breach notification", "72 hours deadline", "https://w.test"),
        ])));

        let outcome = c.gather(&route(&[CorpusTag::Gdpr]), QUERY).await;
        assert_eq!(outcome.sufficiency, Sufficiency::NoStrongMatch);
        assert!(outcome.used_web_fallback);
        assert_eq!(outcome.total_chunks(), 1);
        assert_eq!(outcome.web_results.len(), 1);
        assert_eq!(outcome.web_status, Some(WebStatus::Completed));
    }

    #[tokio::test]
    async fn test_no_evidence_triggers_web() {
        let store = Arc::new(StaticStore::new());
        let c = controller(store);
        let outcome = c.gather(&route(&[CorpusTag::Gdpr]), QUERY).await;
        assert_eq!(outcome.sufficiency, Sufficiency::NoEvidence);
        assert!(outcome.used_web_fallback);
        assert_eq!(outcome.web_status, Some(WebStatus::Disabled));
    }

    #[tokio::test]
    async fn test_strong_but_irrelevant_triggers_web() {
        let store = Arc::new(StaticStore::new().with_hits(
            "company",
            vec![StoreHit::new("Parking spaces are allocated by seniority.", 0.9)],
        ));
        let c = controller(store);
        let outcome = c.gather(&route(&[CorpusTag::Company]), QUERY).await;
        assert_eq!(outcome.sufficiency, Sufficiency::NotRelevant);
        assert!(outcome.used_web_fallback);
    }

    #[tokio::test]
    async fn test_min_total_chunks() {
        let store = Arc::new(StaticStore::new().with_hits(
            "gdpr",
            vec![StoreHit::new("breach notification within 72 hours", 0.9)],
        ));
        let c = FallbackController::new(relevance(), 3, 2, Duration::from_secs(1)).with_corpus(
            CorpusRetriever::new(CorpusTag::Gdpr, "gdpr", store),
            THRESHOLDS,
        );
        let outcome = c.gather(&route(&[CorpusTag::Gdpr]), QUERY).await;
        assert_eq!(outcome.sufficiency, Sufficiency::TooFewChunks);
    }

    #[tokio::test]
    async fn test_web_requested_fires_even_when_sufficient() {
        let store = Arc::new(StaticStore::new().with_hits(
            "gdpr",
            vec![StoreHit::new("breach notification within 72 hours", 0.9)],
        ));
        let decision = route(&[CorpusTag::Gdpr]).with_web_requested(true);

        let without_web = controller(store.clone());
        assert!(!without_web.gather(&decision, QUERY).await.used_web_fallback);

        let with_web = controller(store)
            .with_web_search(web_agent(StaticWebSearch::with_results(vec![])));
        let outcome = with_web.gather(&decision, QUERY).await;
        assert_eq!(outcome.sufficiency, Sufficiency::Sufficient);
        assert!(outcome.used_web_fallback);
    }

    // -------------------------------------------------------------------
    // Partial failure isolation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_one_corpus_failure_isolated() {
        let store = Arc::new(
            StaticStore::new()
                .failing("pdp", BackendError::Connection("refused".into()))
                .with_hits(
                    "gdpr",
                    vec![StoreHit::new("breach notification within 72 hours", 0.9)],
                ),
        );
        let c = controller(store);
        let outcome = c
            .gather(&route(&[CorpusTag::Pdp, CorpusTag::Gdpr]), QUERY)
            .await;
        assert_eq!(outcome.failed_corpora, vec![CorpusTag::Pdp]);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].corpus, CorpusTag::Pdp);
        assert!(outcome.results[0].is_empty());
        assert_eq!(outcome.results[1].len(), 1);
        assert_eq!(outcome.sufficiency, Sufficiency::Sufficient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_treated_as_failure() {
        let store = Arc::new(
            StaticStore::new()
                .with_hits("gdpr", vec![StoreHit::new("breach notification", 0.9)])
                .with_delay("gdpr", Duration::from_secs(30)),
        );
        let c = controller(store);
        let outcome = c.gather(&route(&[CorpusTag::Gdpr]), QUERY).await;
        assert_eq!(outcome.failed_corpora, vec![CorpusTag::Gdpr]);
        assert_eq!(outcome.sufficiency, Sufficiency::AllCorporaFailed);
        assert!(outcome.used_web_fallback);
    }

    #[tokio::test]
    async fn test_all_corpora_failed_always_fires() {
        let store = Arc::new(
            StaticStore::new()
                .failing("gdpr", BackendError::Connection("down".into()))
                .failing("pdp", BackendError::Connection("down".into())),
        );
        let c = controller(store).with_web_search(web_agent(StaticWebSearch::with_results(vec![])));
        let outcome = c
            .gather(&route(&[CorpusTag::Gdpr, CorpusTag::Pdp]), QUERY)
            .await;
        assert!(outcome.all_corpora_failed());
        assert!(outcome.used_web_fallback);
        assert_eq!(outcome.web_status, Some(WebStatus::Completed));
    }

    #[tokio::test]
    async fn test_per_corpus_strong_threshold() {
        let store = Arc::new(StaticStore::new().with_hits(
            "company",
            vec![StoreHit::new("breach notification procedure", 0.4)],
        ));
        let c = FallbackController::new(relevance(), 3, 1, Duration::from_secs(1)).with_corpus(
            CorpusRetriever::new(CorpusTag::Company, "company", store),
            CorpusThresholds {
                score_threshold: 0.2,
                strong_match_threshold: 0.35,
            },
        );
        let outcome = c.gather(&route(&[CorpusTag::Company]), QUERY).await;
        assert_eq!(outcome.sufficiency, Sufficiency::Sufficient);
    }
}
