use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PrivlexError, Result};
use crate::types::CorpusTag;

/// Top-level configuration for the Privlex assistant.
///
/// Loaded from `~/.privlex/config.toml` by default. Each section corresponds
/// to one stage of the answer pipeline or to an external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivlexConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default = "default_corpora")]
    pub corpora: Vec<CorpusConfig>,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for PrivlexConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            retrieval: RetrievalConfig::default(),
            router: RouterConfig::default(),
            relevance: RelevanceConfig::default(),
            web_search: WebSearchConfig::default(),
            synthesis: SynthesisConfig::default(),
            memory: MemoryConfig::default(),
            timeouts: TimeoutConfig::default(),
            corpora: default_corpora(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl PrivlexConfig {
    /// Load configuration from a TOML file and validate it.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PrivlexConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist, cannot be parsed, or is invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check value ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.general.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of {:?}", LEVELS),
            ));
        }

        if self.retrieval.k == 0 {
            return Err(invalid("retrieval.k", "must be at least 1"));
        }
        check_unit("retrieval.score_threshold", self.retrieval.score_threshold)?;
        check_unit(
            "retrieval.strong_match_threshold",
            self.retrieval.strong_match_threshold,
        )?;
        check_unit("relevance.min_term_overlap", self.relevance.min_term_overlap)?;

        if self.synthesis.max_query_chars == 0 {
            return Err(invalid("synthesis.max_query_chars", "must be at least 1"));
        }

        if self.corpora.is_empty() {
            return Err(invalid("corpora", "at least one corpus is required"));
        }
        let mut seen = HashSet::new();
        for corpus in &self.corpora {
            if !seen.insert(corpus.tag) {
                return Err(invalid(
                    "corpora",
                    format!("corpus '{}' is declared more than once", corpus.tag),
                ));
            }
            if let Some(t) = corpus.score_threshold {
                check_unit(&format!("corpora.{}.score_threshold", corpus.tag), t)?;
            }
            if let Some(t) = corpus.strong_match_threshold {
                check_unit(&format!("corpora.{}.strong_match_threshold", corpus.tag), t)?;
            }
        }
        Ok(())
    }

    /// Apply `PRIVLEX_*` environment variable overrides (secrets and endpoints).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let p = &mut self.providers;

        if let Some(v) = get("PRIVLEX_ELASTICSEARCH_URL") {
            p.elasticsearch.url = v;
        }
        if let Some(v) = get("PRIVLEX_ELASTICSEARCH_API_KEY") {
            p.elasticsearch.api_key = v;
        }
        if let Some(v) = get("PRIVLEX_CHAT_ENDPOINT") {
            p.chat.endpoint = v;
        }
        if let Some(v) = get("PRIVLEX_CHAT_API_KEY") {
            p.chat.api_key = v;
        }
        if let Some(v) = get("PRIVLEX_CHAT_DEPLOYMENT") {
            p.chat.deployment = v;
        }
        if let Some(v) = get("PRIVLEX_EMBED_ENDPOINT") {
            p.embeddings.endpoint = v;
        }
        if let Some(v) = get("PRIVLEX_EMBED_API_KEY") {
            p.embeddings.api_key = v;
        }
        if let Some(v) = get("PRIVLEX_EMBED_DEPLOYMENT") {
            p.embeddings.deployment = v;
        }
        if let Some(v) = get("PRIVLEX_TAVILY_URL") {
            p.tavily.url = v;
        }
        if let Some(v) = get("PRIVLEX_TAVILY_API_KEY") {
            p.tavily.api_key = v;
        }
        if let Some(v) = get("PRIVLEX_LOG_LEVEL") {
            self.general.log_level = v.to_lowercase();
        }
    }

    /// Look up the configuration for a corpus tag.
    pub fn corpus(&self, tag: CorpusTag) -> Option<&CorpusConfig> {
        self.corpora.iter().find(|c| c.tag == tag)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> PrivlexError {
    PrivlexError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn check_unit(field: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("{} is outside [0, 1]", value)))
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Corpus retrieval and sufficiency thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum chunks returned per corpus.
    pub k: usize,
    /// Per-corpus cutoff; chunks scoring below it are discarded.
    pub score_threshold: f32,
    /// A chunk at or above this score counts as a strong match.
    pub strong_match_threshold: f32,
    /// Minimum combined chunk count across corpora for evidence to be sufficient.
    pub min_total_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 3,
            score_threshold: 0.5,
            strong_match_threshold: 0.75,
            min_total_chunks: 1,
        }
    }
}

/// Query router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Ask the chat model to pick corpora before falling back to keywords.
    pub use_model: bool,
    /// Words that request fresh web results alongside the corpora.
    pub recency_keywords: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            use_model: true,
            recency_keywords: vec!["recent".to_string(), "latest".to_string()],
        }
    }
}

/// Relevance evaluator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// Ask the chat model for a relevant / not relevant judgement.
    pub use_model: bool,
    /// Fraction of query terms that must appear in a candidate (keyword mode).
    pub min_term_overlap: f32,
    /// Characters of candidate text shown to the model.
    pub max_candidate_chars: usize,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            use_model: false,
            min_term_overlap: 0.2,
            max_candidate_chars: 1000,
        }
    }
}

/// Web search fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub enabled: bool,
    pub max_results: usize,
    /// Provider search depth: "basic" or "advanced".
    pub search_depth: String,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: 3,
            search_depth: "advanced".to_string(),
        }
    }
}

/// Answer synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Generate answers with the chat model; otherwise compose extractively.
    pub use_model: bool,
    /// Prior messages included in the synthesis prompt.
    pub history_messages: usize,
    /// Maximum characters of evidence kept per citation excerpt.
    pub max_excerpt_chars: usize,
    /// Queries longer than this are rejected.
    pub max_query_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            use_model: true,
            history_messages: 6,
            max_excerpt_chars: 400,
            max_query_chars: 2000,
        }
    }
}

/// Conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Messages handed to the router and follow-up resolver.
    pub recent_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { recent_window: 6 }
    }
}

/// Timeouts for every external call, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub retrieval_ms: u64,
    pub web_search_ms: u64,
    pub model_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            retrieval_ms: 10_000,
            web_search_ms: 30_000,
            model_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn retrieval(&self) -> Duration {
        Duration::from_millis(self.retrieval_ms)
    }

    pub fn web_search(&self) -> Duration {
        Duration::from_millis(self.web_search_ms)
    }

    pub fn model(&self) -> Duration {
        Duration::from_millis(self.model_ms)
    }
}

/// One searchable corpus and its routing description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub tag: CorpusTag,
    /// Index name in the vector store.
    pub index: String,
    /// Topic description shown to the routing classifier.
    pub description: String,
    /// Lowercase phrases that route a query to this corpus.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Overrides `retrieval.score_threshold` for this corpus's score scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
    /// Overrides `retrieval.strong_match_threshold` for this corpus's score scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strong_match_threshold: Option<f32>,
}

impl CorpusConfig {
    /// Score cutoff for this corpus.
    pub fn effective_score_threshold(&self, retrieval: &RetrievalConfig) -> f32 {
        self.score_threshold.unwrap_or(retrieval.score_threshold)
    }

    /// Strong-match threshold for this corpus.
    pub fn effective_strong_match_threshold(&self, retrieval: &RetrievalConfig) -> f32 {
        self.strong_match_threshold
            .unwrap_or(retrieval.strong_match_threshold)
    }
}

fn default_corpora() -> Vec<CorpusConfig> {
    let kw = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();
    vec![
        CorpusConfig {
            tag: CorpusTag::Gdpr,
            index: "gdpr".to_string(),
            description: "GDPR (General Data Protection Regulation): European data protection \
                          law, data subject rights, lawful processing, controller and processor \
                          obligations."
                .to_string(),
            keywords: kw(&["gdpr", "general data protection", "european", "eu data"]),
            score_threshold: None,
            strong_match_threshold: None,
        },
        CorpusConfig {
            tag: CorpusTag::Pdp,
            index: "pdp".to_string(),
            description: "UU PDP (Undang-Undang Perlindungan Data Pribadi): Indonesian personal \
                          data protection law and local compliance requirements."
                .to_string(),
            keywords: kw(&[
                "uu pdp",
                "pdp",
                "indonesia",
                "indonesian",
                "indonesian data protection",
                "undang-undang",
            ]),
            score_threshold: None,
            strong_match_threshold: None,
        },
        CorpusConfig {
            tag: CorpusTag::Company,
            index: "company".to_string(),
            description: "Internal company data-protection policies, procedures and data \
                          handling guidelines."
                .to_string(),
            keywords: kw(&["company", "internal", "organizational", "corporate policy"]),
            score_threshold: None,
            strong_match_threshold: None,
        },
    ]
}

/// Connection settings for the external collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub elasticsearch: ElasticsearchConfig,
    pub chat: ChatModelConfig,
    pub embeddings: EmbeddingModelConfig,
    pub tavily: TavilyConfig,
}

/// Elasticsearch vector store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub api_key: String,
    /// Dense vector field holding chunk embeddings.
    pub vector_field: String,
    /// Source field holding chunk text.
    pub text_field: String,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            vector_field: "vector".to_string(),
            text_field: "text".to_string(),
        }
    }
}

impl ElasticsearchConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Azure OpenAI chat deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatModelConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatModelConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            deployment: String::new(),
            api_version: "2024-12-01-preview".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
        }
    }
}

impl ChatModelConfig {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty() && !self.deployment.trim().is_empty()
    }
}

/// Azure OpenAI embedding deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingModelConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl Default for EmbeddingModelConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            deployment: String::new(),
            api_version: "2023-05-15".to_string(),
        }
    }
}

impl EmbeddingModelConfig {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty() && !self.deployment.trim().is_empty()
    }
}

/// Tavily web search API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TavilyConfig {
    pub url: String,
    pub api_key: String,
}

impl Default for TavilyConfig {
    fn default() -> Self {
        Self {
            url: "https://api.tavily.com/search".to_string(),
            api_key: String::new(),
        }
    }
}

impl TavilyConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}
