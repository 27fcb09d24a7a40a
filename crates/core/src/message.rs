//! Message domain types.
//!
//! A conversation is an ordered `Vec<Message>`; the full ordered sequence is
//! the unit the context window truncates.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Keep only the most recent `limit` messages, preserving order.
pub fn truncate_history(messages: &[Message], limit: usize) -> Vec<Message> {
    let start = messages.len().saturating_sub(limit);
    messages[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn truncation_keeps_latest_in_order() {
        let history: Vec<Message> = (0..5).map(|i| Message::user(i.to_string())).collect();
        let kept = truncate_history(&history, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content, "3");
        assert_eq!(kept[1].content, "4");
    }

    #[test]
    fn truncation_with_large_limit_keeps_all() {
        let history = vec![Message::user("a"), Message::assistant("b")];
        assert_eq!(truncate_history(&history, 20), history);
    }
}
