//! Query router: maps a query and recent memory to the corpora to search.
//!
//! Resolution order:
//! 1. chat-model classifier (when attached); a backend error selects every
//!    corpus and stops here
//! 2. corpus keyword phrases in the query
//! 3. for follow-up questions only, keyword phrases in the session's recent
//!    user messages
//! 4. every configured corpus
//!
//! The result is never empty.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use privlex_core::config::CorpusConfig;
use privlex_core::types::{CorpusTag, Message, Role};

use crate::backend::{with_timeout, ChatModel, PromptMessage};
use crate::error::AgentError;
use crate::parser::{has_anaphora, mentions_any};
use crate::types::{RouteDecision, RouteMethod};

/// Tokens in a classifier reply that request live web results.
const WEB_TOKENS: &[&str] = &["web", "tavily", "internet"];

/// Routing metadata for one corpus.
#[derive(Debug, Clone)]
pub struct CorpusRoute {
    pub tag: CorpusTag,
    pub description: String,
    pub keywords: Vec<String>,
}

impl From<&CorpusConfig> for CorpusRoute {
    fn from(config: &CorpusConfig) -> Self {
        Self {
            tag: config.tag,
            description: config.description.clone(),
            keywords: config.keywords.clone(),
        }
    }
}

/// Selects corpora for a query.
pub struct QueryRouter {
    routes: Vec<CorpusRoute>,
    model: Option<Arc<dyn ChatModel>>,
    timeout: Duration,
    recency_keywords: Vec<String>,
}

impl QueryRouter {
    /// Create a keyword-only router. Fails when no corpus is given.
    pub fn new(routes: Vec<CorpusRoute>) -> Result<Self, AgentError> {
        if routes.is_empty() {
            return Err(AgentError::NoCorpora);
        }
        Ok(Self {
            routes,
            model: None,
            timeout: Duration::from_secs(60),
            recency_keywords: Vec::new(),
        })
    }

    /// Ask `model` to classify queries before trying keywords.
    pub fn with_model(mut self, model: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        self.model = Some(model);
        self.timeout = timeout;
        self
    }

    /// Words that request fresh web results ("recent", "latest").
    pub fn with_recency_keywords(mut self, keywords: Vec<String>) -> Self {
        self.recency_keywords = keywords;
        self
    }

    /// Every configured corpus, in configuration order.
    pub fn all_corpora(&self) -> Vec<CorpusTag> {
        self.routes.iter().map(|r| r.tag).collect()
    }

    /// Decide which corpora to search for `query`.
    pub async fn route(&self, query: &str, recent: &[Message]) -> RouteDecision {
        let web_requested = mentions_any(query, &self.recency_keywords);

        if let Some(model) = &self.model {
            match with_timeout(self.timeout, model.complete(&self.classifier_prompt(query))).await
            {
                Ok(reply) => {
                    let (tags, web) = self.parse_classifier_reply(&reply);
                    if let Some(decision) = RouteDecision::new(tags, RouteMethod::Classifier) {
                        debug!(corpora = ?decision.corpora(), "Routed by classifier");
                        return decision.with_web_requested(web_requested || web);
                    }
                    debug!(reply = %reply, "Classifier named no known corpus");
                }
                Err(e) => {
                    warn!(error = %e, "Routing classifier failed, querying all corpora");
                    return self.everything(RouteMethod::ClassifierFailed, web_requested);
                }
            }
        }

        if let Some(decision) = RouteDecision::new(self.keyword_matches(query), RouteMethod::Keyword)
        {
            debug!(corpora = ?decision.corpora(), "Routed by keywords");
            return decision.with_web_requested(web_requested);
        }

        if has_anaphora(query) {
            let carried = recent
                .iter()
                .rev()
                .filter(|m| m.role == Role::User)
                .map(|m| self.keyword_matches(&m.text))
                .find(|tags| !tags.is_empty())
                .unwrap_or_default();
            if let Some(decision) = RouteDecision::new(carried, RouteMethod::FollowUp) {
                debug!(corpora = ?decision.corpora(), "Routed from session memory");
                return decision.with_web_requested(web_requested);
            }
        }

        self.everything(RouteMethod::Default, web_requested)
    }

    fn everything(&self, method: RouteMethod, web_requested: bool) -> RouteDecision {
        // `new` rejects empty route lists, so `routes` is never empty here.
        RouteDecision::new_unchecked(self.all_corpora(), method).with_web_requested(web_requested)
    }

    fn keyword_matches(&self, text: &str) -> Vec<CorpusTag> {
        self.routes
            .iter()
            .filter(|r| mentions_any(text, &r.keywords))
            .map(|r| r.tag)
            .collect()
    }

    fn classifier_prompt(&self, query: &str) -> Vec<PromptMessage> {
        let catalogue: Vec<String> = self
            .routes
            .iter()
            .map(|r| format!("- {}: {}", r.tag.as_str(), r.description))
            .collect();
        let system = format!(
            "You route legal questions to document collections.\n\
             Available collections:\n{}\n- web: live web search for recent developments\n\n\
             Reply with the matching collection names separated by commas, for example \
             \"gdpr, pdp\". Reply \"none\" if no collection fits.",
            catalogue.join("\n")
        );
        vec![PromptMessage::system(system), PromptMessage::user(query)]
    }

    /// Extract known corpus tags (in reply order) and the web flag from a
    /// free-form classifier reply such as `['gdpr', 'pdp']` or `GDPR and UU PDP`.
    fn parse_classifier_reply(&self, reply: &str) -> (Vec<CorpusTag>, bool) {
        let mut tags = Vec::new();
        let mut web = false;
        for token in reply
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            if WEB_TOKENS.contains(&token.as_str()) {
                web = true;
                continue;
            }
            if let Ok(tag) = CorpusTag::from_str(&token) {
                if self.routes.iter().any(|r| r.tag == tag) && !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        (tags, web)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::mock::ScriptedChatModel;
    use privlex_core::config::PrivlexConfig;

    fn router() -> QueryRouter {
        let config = PrivlexConfig::default();
        QueryRouter::new(config.corpora.iter().map(CorpusRoute::from).collect())
            .unwrap()
            .with_recency_keywords(config.router.recency_keywords.clone())
    }

    #[test]
    fn test_no_corpora_rejected() {
        assert!(matches!(QueryRouter::new(vec![]), Err(AgentError::NoCorpora)));
    }

    // -------------------------------------------------------------------
    // Keyword routing
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_keyword_single_corpus() {
        let d = router().route("What is the GDPR breach deadline?", &[]).await;
        assert_eq!(d.corpora(), &[CorpusTag::Gdpr]);
        assert_eq!(d.method(), RouteMethod::Keyword);
        assert!(!d.web_requested());
    }

    #[tokio::test]
    async fn test_keyword_multiple_corpora() {
        let d = router()
            .route("Compare GDPR and Indonesian rules with our internal policy", &[])
            .await;
        assert_eq!(
            d.corpora(),
            &[CorpusTag::Gdpr, CorpusTag::Pdp, CorpusTag::Company]
        );
    }

    #[tokio::test]
    async fn test_no_match_defaults_to_all() {
        let d = router().route("How long may we keep CVs?", &[]).await;
        assert_eq!(d.corpora(), &CorpusTag::ALL);
        assert_eq!(d.method(), RouteMethod::Default);
    }

    #[tokio::test]
    async fn test_recency_requests_web() {
        let d = router().route("latest GDPR fines", &[]).await;
        assert!(d.web_requested());
    }

    #[tokio::test]
    async fn test_follow_up_uses_memory() {
        let recent = vec![
            Message::user("What does UU PDP say about consent?"),
            Message::assistant("Consent must be explicit [1].", vec![]),
        ];
        let d = router().route("And what about its exceptions?", &recent).await;
        assert_eq!(d.corpora(), &[CorpusTag::Pdp]);
        assert_eq!(d.method(), RouteMethod::FollowUp);
    }

    #[tokio::test]
    async fn test_standalone_question_ignores_memory() {
        let recent = vec![
            Message::user("Explain GDPR Article 17"),
            Message::assistant("Right to erasure [1].", vec![]),
        ];
        let d = router()
            .route("How long can employee records be kept after that person leaves?", &recent)
            .await;
        assert_eq!(d.corpora(), &CorpusTag::ALL);
        assert_eq!(d.method(), RouteMethod::Default);
    }

    // -------------------------------------------------------------------
    // Classifier routing
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_classifier_reply_parsed() {
        let model = Arc::new(ScriptedChatModel::replying("['pdp', 'gdpr', 'tavily']"));
        let r = router().with_model(model.clone(), Duration::from_secs(5));
        let d = r.route("Cross-border transfer rules?", &[]).await;
        assert_eq!(d.corpora(), &[CorpusTag::Pdp, CorpusTag::Gdpr]);
        assert_eq!(d.method(), RouteMethod::Classifier);
        assert!(d.web_requested());
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_classifier_none_falls_back_to_keywords() {
        let model = Arc::new(ScriptedChatModel::replying("none"));
        let r = router().with_model(model, Duration::from_secs(5));
        let d = r.route("company retention schedule", &[]).await;
        assert_eq!(d.corpora(), &[CorpusTag::Company]);
        assert_eq!(d.method(), RouteMethod::Keyword);
    }

    #[tokio::test]
    async fn test_classifier_failure_selects_all() {
        let model = Arc::new(ScriptedChatModel::failing(BackendError::Status {
            status: 500,
            body: "boom".into(),
        }));
        let r = router().with_model(model, Duration::from_secs(5));
        let d = r.route("GDPR only please", &[]).await;
        assert_eq!(d.corpora(), &CorpusTag::ALL);
        assert_eq!(d.method(), RouteMethod::ClassifierFailed);
    }

    #[tokio::test]
    async fn test_classifier_ignores_unconfigured_tags() {
        let config = PrivlexConfig::default();
        let routes: Vec<CorpusRoute> = config
            .corpora
            .iter()
            .filter(|c| c.tag == CorpusTag::Gdpr)
            .map(CorpusRoute::from)
            .collect();
        let model = Arc::new(ScriptedChatModel::replying("company, gdpr"));
        let r = QueryRouter::new(routes)
            .unwrap()
            .with_model(model, Duration::from_secs(5));
        let d = r.route("anything", &[]).await;
        assert_eq!(d.corpora(), &[CorpusTag::Gdpr]);
    }

    #[tokio::test]
    async fn test_route_never_empty() {
        let r = router();
        for q in ["", "?", "zzz", "tell me", "latest"] {
            assert!(!r.route(q, &[]).await.corpora().is_empty(), "empty for {:?}", q);
        }
    }
}
