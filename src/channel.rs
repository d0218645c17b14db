//! Seams to the outside world: posting to a group and reading its history

use crate::error::Result;
use crate::groupme::InboundMessage;
use async_trait::async_trait;

/// An @mention over a span of the outgoing text.
///
/// `index` and `length` are counted in UTF-16 code units, which is what the
/// platform expects.
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub user_id: String,
    pub index: usize,
    pub length: usize,
}

impl Mention {
    /// Mention over `name` placed directly after `prefix`
    pub fn after(prefix: &str, name: &str, user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            index: prefix.encode_utf16().count(),
            length: name.encode_utf16().count(),
        }
    }
}

/// A message to post into a group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outbound {
    pub text: String,
    pub mentions: Vec<Mention>,
    pub reply_to: Option<String>,
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post `message` into `group_id`
    async fn send(&self, group_id: &str, message: Outbound) -> Result<()>;
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Up to one page of messages older than `before_id` (newest first).
    /// An empty page means there is nothing further back.
    async fn fetch_page(&self, group_id: &str, before_id: Option<&str>)
        -> Result<Vec<InboundMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mention_ascii() {
        let m = Mention::after("Reminder for ", "Alice", "u1");
        assert_eq!(m.index, 13);
        assert_eq!(m.length, 5);
        assert_eq!(m.user_id, "u1");
    }

    #[test]
    fn test_mention_counts_utf16_units() {
        // the bell is outside the BMP and takes two UTF-16 units
        let m = Mention::after("🔔 Reminder for ", "Bob", "u2");
        assert_eq!(m.index, 16);
        assert_eq!(m.length, 3);
    }

    #[test]
    fn test_outbound_text() {
        let out = Outbound::text("pong");
        assert_eq!(out.text, "pong");
        assert!(out.mentions.is_empty());
        assert!(out.reply_to.is_none());
    }
}
