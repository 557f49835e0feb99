//! Model client trait definitions.

use async_trait::async_trait;
use mcpilot_core::{Conversation, ToolDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the model wants to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// Stop and answer the task.
    FinalAnswer { text: String },
    /// Invoke a tool and report back.
    ToolCall { name: String, arguments: Value },
}

impl Decision {
    /// Create a final answer.
    pub fn final_answer(text: impl Into<String>) -> Self {
        Self::FinalAnswer { text: text.into() }
    }

    /// Create a tool call request.
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall {
            name: name.into(),
            arguments,
        }
    }
}

/// A language model that picks the agent's next action.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Client identifier.
    fn id(&self) -> &str;

    /// Decide the next action given everything said so far.
    async fn decide(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
    ) -> anyhow::Result<Decision>;
}
