//! A model client that replays a fixed list of decisions.
//!
//! Useful for exercising the agent loop without a model backend.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use mcpilot_core::{Conversation, ToolDescriptor};

use crate::traits::{Decision, ModelClient};

/// Replays decisions in order, optionally repeating one forever.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Decision>>,
    repeat: Option<Decision>,
    seen: Mutex<Vec<Conversation>>,
}

impl ScriptedModel {
    /// Replay `decisions`, then fail.
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            script: Mutex::new(decisions.into_iter().collect()),
            repeat: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Return `decision` on every call.
    pub fn repeating(decision: Decision) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(decision),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Number of times `decide` was called.
    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    /// Snapshot of the conversation passed to each call.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn decide(
        &self,
        conversation: &Conversation,
        _tools: &[ToolDescriptor],
    ) -> anyhow::Result<Decision> {
        self.seen.lock().push(conversation.clone());

        if let Some(decision) = self.script.lock().pop_front() {
            return Ok(decision);
        }
        self.repeat
            .clone()
            .ok_or_else(|| anyhow::anyhow!("scripted model has no decisions left"))
    }
}
