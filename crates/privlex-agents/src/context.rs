//! Follow-up resolution.
//!
//! A question like "what are its exceptions?" only makes sense next to the
//! turn before it. The resolver rewrites such queries into a standalone
//! search query by appending the topic of the most recent self-contained
//! user question. The original wording is kept for synthesis and memory.

use privlex_core::types::{Message, Role};

use crate::parser::{content_terms, has_anaphora};

/// Upper bound on topic terms carried into a follow-up.
const MAX_TOPIC_TERMS: usize = 8;

/// A query together with the search text derived from session context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    /// What the user typed.
    pub original: String,
    /// What retrieval and routing should search for.
    pub effective: String,
    /// Terms carried over from earlier turns, if any.
    pub topic: Option<String>,
}

impl ResolvedQuery {
    fn standalone(query: &str) -> Self {
        Self {
            original: query.to_string(),
            effective: query.to_string(),
            topic: None,
        }
    }

    pub fn is_follow_up(&self) -> bool {
        self.topic.is_some()
    }
}

/// Rewrites anaphoric follow-ups using recent session messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct FollowUpResolver;

impl FollowUpResolver {
    /// Resolve `query` against `recent` (oldest first).
    ///
    /// Queries without anaphora, or sessions without prior user messages, are
    /// returned unchanged.
    pub fn resolve(&self, query: &str, recent: &[Message]) -> ResolvedQuery {
        if !has_anaphora(query) {
            return ResolvedQuery::standalone(query);
        }

        let own_terms = content_terms(query);
        let mut topic_terms: Vec<String> = Vec::new();

        // Walk back through user turns until one stands on its own.
        for message in recent.iter().rev().filter(|m| m.role == Role::User) {
            for term in content_terms(&message.text) {
                if !own_terms.contains(&term) && !topic_terms.contains(&term) {
                    topic_terms.push(term);
                }
            }
            if !has_anaphora(&message.text) {
                break;
            }
        }

        if topic_terms.is_empty() {
            return ResolvedQuery::standalone(query);
        }
        topic_terms.truncate(MAX_TOPIC_TERMS);

        let topic = topic_terms.join(" ");
        ResolvedQuery {
            original: query.to_string(),
            effective: format!("{} ({})", query.trim(), topic),
            topic: Some(topic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(pairs: &[(&str, &str)]) -> Vec<Message> {
        pairs
            .iter()
            .flat_map(|(q, a)| [Message::user(*q), Message::assistant(*a, vec![])])
            .collect()
    }

    #[test]
    fn test_standalone_query_unchanged() {
        let recent = history(&[("Explain GDPR Article 17", "Right to erasure [1].")]);
        let r = FollowUpResolver.resolve("What is the UU PDP breach deadline?", &recent);
        assert_eq!(r.effective, "What is the UU PDP breach deadline?");
        assert!(!r.is_follow_up());
    }

    #[test]
    fn test_relative_clause_is_not_a_follow_up() {
        let recent = history(&[("Explain GDPR Article 17", "Right to erasure [1].")]);
        for q in [
            "How long can employee records be kept after that person leaves?",
            "Which rules apply to employee data that our company stores?",
            "Is it lawful to keep CCTV footage for a year?",
        ] {
            let r = FollowUpResolver.resolve(q, &recent);
            assert_eq!(r.effective, q);
            assert!(!r.is_follow_up(), "treated as follow-up: {:?}", q);
        }
    }

    #[test]
    fn test_pronoun_resolved_to_previous_topic() {
        let recent = history(&[("Explain GDPR Article 17", "Right to erasure [1].")]);
        let r = FollowUpResolver.resolve("What are its exceptions?", &recent);
        assert_eq!(r.original, "What are its exceptions?");
        assert_eq!(r.topic.as_deref(), Some("gdpr article 17"));
        assert_eq!(r.effective, "What are its exceptions? (gdpr article 17)");
    }

    #[test]
    fn test_chained_follow_ups_reach_anchor() {
        let recent = history(&[
            ("Explain GDPR Article 17", "Right to erasure [1]."),
            ("What are its exceptions?", "Freedom of expression [1]."),
        ]);
        let r = FollowUpResolver.resolve("Does that apply to processors?", &recent);
        let topic = r.topic.unwrap();
        assert!(topic.contains("exceptions"));
        assert!(topic.contains("gdpr"));
        assert!(topic.contains("17"));
    }

    #[test]
    fn test_no_history_unchanged() {
        let r = FollowUpResolver.resolve("What about its exceptions?", &[]);
        assert_eq!(r.effective, "What about its exceptions?");
        assert!(r.topic.is_none());
    }

    #[test]
    fn test_assistant_messages_ignored() {
        let recent = vec![Message::assistant("GDPR Article 33 sets 72 hours.", vec![])];
        let r = FollowUpResolver.resolve("what about that?", &recent);
        assert!(!r.is_follow_up());
    }
}
