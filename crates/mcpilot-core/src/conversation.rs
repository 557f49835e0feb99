//! Conversation primitives.
//!
//! A [`Conversation`] is an append-only list of [`Turn`]s. The agent loop owns
//! it; model clients only ever receive a shared reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolInvocation;

/// Role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Task or message from the human
    Human,
    /// Model response
    Assistant,
    /// Result of a tool invocation
    ToolResult,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Assistant => write!(f, "assistant"),
            Self::ToolResult => write!(f, "tool-result"),
        }
    }
}

/// Content of a single turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnContent {
    /// Plain text
    Text { text: String },
    /// Output of a tool invocation
    ToolResult {
        /// The invocation this result answers
        invocation: ToolInvocation,
        /// Decoded tool output or error description
        output: String,
        /// Whether the output describes a failure
        is_error: bool,
    },
}

/// A turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,
    /// Turn role
    pub role: Role,
    /// Turn content
    pub content: TurnContent,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn with_content(role: Role, content: TurnContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a human turn.
    pub fn human(text: impl Into<String>) -> Self {
        Self::with_content(Role::Human, TurnContent::Text { text: text.into() })
    }

    /// Create an assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_content(Role::Assistant, TurnContent::Text { text: text.into() })
    }

    /// Create a tool-result turn.
    pub fn tool_result(invocation: ToolInvocation, output: impl Into<String>, is_error: bool) -> Self {
        Self::with_content(
            Role::ToolResult,
            TurnContent::ToolResult {
                invocation,
                output: output.into(),
                is_error,
            },
        )
    }

    /// Get the turn's text (the output for tool results).
    pub fn text(&self) -> &str {
        match &self.content {
            TurnContent::Text { text } => text,
            TurnContent::ToolResult { output, .. } => output,
        }
    }

    /// Whether this turn records a failed tool invocation.
    pub fn is_error(&self) -> bool {
        matches!(self.content, TurnContent::ToolResult { is_error: true, .. })
    }
}

/// Ordered, append-only sequence of turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Create an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// All turns in order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the conversation has no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent turn.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Tool-result turns in order.
    pub fn tool_results(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.role == Role::ToolResult)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_order() {
        let mut conversation = Conversation::new();
        conversation.push(Turn::human("fetch example.com"));
        conversation.push(Turn::tool_result(
            ToolInvocation::new("call_1", "fetchkit", json!({"url": "https://example.com"})),
            "timeout",
            true,
        ));
        conversation.push(Turn::assistant("The site timed out."));

        let roles: Vec<Role> = conversation.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::Human, Role::ToolResult, Role::Assistant]);
        assert_eq!(conversation.tool_results().count(), 1);
        assert!(conversation.turns()[1].is_error());
        assert_eq!(conversation.last().unwrap().text(), "The site timed out.");
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::ToolResult).unwrap(), "\"tool-result\"");
        assert_eq!(Role::Human.to_string(), "human");
    }

    #[test]
    fn test_turn_content_tagging() {
        let turn = Turn::assistant("done");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["content"]["type"], "text");
        assert_eq!(value["role"], "assistant");
    }
}
