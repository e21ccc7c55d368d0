use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PrivlexError;

// =============================================================================
// Enums
// =============================================================================

/// A document corpus the assistant can retrieve from.
///
/// The set is closed: each tag is bound to exactly one retriever at startup.
/// Adding a corpus means adding a variant here and a `[[corpora]]` entry in
/// the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusTag {
    /// EU General Data Protection Regulation.
    Gdpr,
    /// Indonesian Personal Data Protection Law (UU PDP).
    Pdp,
    /// Internal company data-protection policies.
    Company,
}

impl CorpusTag {
    /// Every known tag, in canonical routing order.
    pub const ALL: [CorpusTag; 3] = [CorpusTag::Gdpr, CorpusTag::Pdp, CorpusTag::Company];

    /// Stable identifier used in configuration, logs and citations.
    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusTag::Gdpr => "gdpr",
            CorpusTag::Pdp => "pdp",
            CorpusTag::Company => "company",
        }
    }

    /// Human-readable corpus name.
    pub fn display_name(&self) -> &'static str {
        match self {
            CorpusTag::Gdpr => "GDPR",
            CorpusTag::Pdp => "UU PDP",
            CorpusTag::Company => "Company Policy",
        }
    }
}

impl fmt::Display for CorpusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorpusTag {
    type Err = PrivlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gdpr" => Ok(CorpusTag::Gdpr),
            "pdp" | "uu_pdp" | "uu pdp" => Ok(CorpusTag::Pdp),
            "company" => Ok(CorpusTag::Company),
            other => Err(PrivlexError::UnknownCorpus(other.to_string())),
        }
    }
}

/// Author of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

// =============================================================================
// Conversation
// =============================================================================

/// Pointer from an answer to the evidence supporting it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Corpus identifier (`gdpr`, `pdp`, `company`) or `web`.
    pub source: String,
    /// Article/section identifier for corpus evidence, URL for web evidence.
    pub locator: String,
    /// The contributing text.
    pub excerpt: String,
}

impl Citation {
    /// Source label for web evidence.
    pub const WEB_SOURCE: &'static str = "web";

    /// Citation for a corpus chunk.
    pub fn corpus(tag: CorpusTag, locator: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self {
            source: tag.as_str().to_string(),
            locator: locator.into(),
            excerpt: excerpt.into(),
        }
    }

    /// Citation for a web search result.
    pub fn web(url: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self {
            source: Self::WEB_SOURCE.to_string(),
            locator: url.into(),
            excerpt: excerpt.into(),
        }
    }

    /// Whether this citation points at web evidence.
    pub fn is_web(&self) -> bool {
        self.source == Self::WEB_SOURCE
    }

    /// `source / locator`, e.g. `gdpr / Art. 33`.
    pub fn label(&self) -> String {
        format!("{} / {}", self.source, self.locator)
    }
}

/// A single message in a session's history. Never mutated after it is stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl Message {
    /// A user message stamped with the current time.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            citations: Vec::new(),
        }
    }

    /// An assistant message stamped with the current time.
    pub fn assistant(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            citations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- CorpusTag ----

    #[test]
    fn test_corpus_tag_round_trips_through_str() {
        for tag in CorpusTag::ALL {
            assert_eq!(tag.as_str().parse::<CorpusTag>().unwrap(), tag);
        }
    }

    #[test]
    fn test_corpus_tag_parse_aliases() {
        assert_eq!("UU PDP".parse::<CorpusTag>().unwrap(), CorpusTag::Pdp);
        assert_eq!(" Company ".parse::<CorpusTag>().unwrap(), CorpusTag::Company);
    }

    #[test]
    fn test_corpus_tag_parse_unknown() {
        let err = "hipaa".parse::<CorpusTag>().unwrap_err();
        assert!(matches!(err, PrivlexError::UnknownCorpus(ref t) if t == "hipaa"));
    }

    #[test]
    fn test_corpus_tag_serde_snake_case() {
        let json = serde_json::to_string(&CorpusTag::Company).unwrap();
        assert_eq!(json, "\"company\"");
        let back: CorpusTag = serde_json::from_str("\"gdpr\"").unwrap();
        assert_eq!(back, CorpusTag::Gdpr);
    }

    #[test]
    fn test_corpus_tag_display() {
        assert_eq!(CorpusTag::Pdp.to_string(), "pdp");
        assert_eq!(CorpusTag::Pdp.display_name(), "UU PDP");
    }

    // ---- Citation ----

    #[test]
    fn test_corpus_citation_label() {
        let c = Citation::corpus(CorpusTag::Gdpr, "Art. 33", "notify within 72 hours");
        assert_eq!(c.label(), "gdpr / Art. 33");
        assert!(!c.is_web());
    }

    #[test]
    fn test_web_citation() {
        let c = Citation::web("https://example.org/breach", "snippet");
        assert!(c.is_web());
        assert_eq!(c.label(), "web / https://example.org/breach");
    }

    // ---- Message ----

    #[test]
    fn test_message_constructors() {
        let u = Message::user("hello");
        assert_eq!(u.role, Role::User);
        assert!(u.citations.is_empty());

        let a = Message::assistant("hi", vec![Citation::web("https://x.test", "x")]);
        assert_eq!(a.role, Role::Assistant);
        assert_eq!(a.citations.len(), 1);
        assert!(a.timestamp >= u.timestamp);
    }

    #[test]
    fn test_message_serializes_without_empty_citations() {
        let json = serde_json::to_value(Message::user("q")).unwrap();
        assert!(json.get("citations").is_none());
        assert_eq!(json["role"], "user");
    }
}
