//! Group chat moderation rules.
//!
//! Inspection is pure; counting warnings goes through the store so the
//! tally survives restarts.

use crate::error::EngineError;
use crate::model::{ChatId, UserId};
use crate::store::LinkStore;

/// Message entity kinds that matter to moderation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Url,
    TextLink,
    TextMention,
    Other,
}

impl EntityKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "url" => EntityKind::Url,
            "text_link" => EntityKind::TextLink,
            "text_mention" => EntityKind::TextMention,
            _ => EntityKind::Other,
        }
    }

    fn is_link(&self) -> bool {
        !matches!(self, EntityKind::Other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Link,
    BannedTerm(String),
}

impl Violation {
    pub fn reason(&self) -> String {
        match self {
            Violation::Link => "sharing links".to_string(),
            Violation::BannedTerm(term) => format!("using a banned word ({})", term),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sanction {
    Warned { count: u32, max: u32 },
    /// The member reached the limit; their counter was reset
    Muted,
}

#[derive(Debug, Clone)]
pub struct Moderator {
    banned_terms: Vec<String>,
    max_warnings: u32,
}

impl Moderator {
    pub fn new(banned_terms: impl IntoIterator<Item = String>, max_warnings: u32) -> Self {
        Self {
            banned_terms: banned_terms
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            max_warnings: max_warnings.max(1),
        }
    }

    pub fn max_warnings(&self) -> u32 {
        self.max_warnings
    }

    pub fn inspect(&self, text: &str, entities: &[EntityKind]) -> Option<Violation> {
        if entities.iter().any(EntityKind::is_link) {
            return Some(Violation::Link);
        }
        let text = text.to_lowercase();
        self.banned_terms
            .iter()
            .find(|term| contains_word(&text, term))
            .map(|term| Violation::BannedTerm(term.clone()))
    }

    /// Count a warning for `user` in `chat` and decide the sanction
    pub async fn warn<S: LinkStore>(
        &self,
        store: &S,
        chat: ChatId,
        user: UserId,
    ) -> Result<Sanction, EngineError> {
        let count = store.add_warning(chat, user).await?;
        if count >= self.max_warnings {
            store.reset_warnings(chat, user).await?;
            return Ok(Sanction::Muted);
        }
        Ok(Sanction::Warned {
            count,
            max: self.max_warnings,
        })
    }
}

/// Whole-word occurrence of `term` in `text`; both already lowercased
fn contains_word(text: &str, term: &str) -> bool {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    text.match_indices(term).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + term.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLinkStore;

    fn moderator() -> Moderator {
        Moderator::new(["Spam".to_string(), "bad deal".to_string(), " ".to_string()], 3)
    }

    #[test]
    fn test_links_are_violations() {
        let m = moderator();
        assert_eq!(m.inspect("hello", &[EntityKind::Url]), Some(Violation::Link));
        assert_eq!(
            m.inspect("hello", &[EntityKind::Other, EntityKind::TextMention]),
            Some(Violation::Link)
        );
        assert_eq!(m.inspect("hello", &[EntityKind::Other]), None);
    }

    #[test]
    fn test_banned_terms_match_whole_words_only() {
        let m = moderator();
        assert_eq!(
            m.inspect("Buy SPAM now", &[]),
            Some(Violation::BannedTerm("spam".into()))
        );
        assert_eq!(
            m.inspect("what a bad deal!", &[]),
            Some(Violation::BannedTerm("bad deal".into()))
        );
        assert_eq!(m.inspect("spammer", &[]), None);
        assert_eq!(m.inspect("antispam", &[]), None);
        assert_eq!(m.inspect("", &[]), None);
    }

    #[tokio::test]
    async fn test_mute_at_threshold_resets_counter() {
        let store = MemoryLinkStore::new();
        let m = moderator();
        assert_eq!(
            m.warn(&store, -5, 7).await.unwrap(),
            Sanction::Warned { count: 1, max: 3 }
        );
        assert_eq!(
            m.warn(&store, -5, 7).await.unwrap(),
            Sanction::Warned { count: 2, max: 3 }
        );
        assert_eq!(m.warn(&store, -5, 7).await.unwrap(), Sanction::Muted);
        assert_eq!(
            m.warn(&store, -5, 7).await.unwrap(),
            Sanction::Warned { count: 1, max: 3 }
        );
    }
}
