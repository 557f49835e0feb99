//! # mcpilot-providers
//!
//! Model clients for Mcpilot.
//!
//! This crate provides:
//! - The `ModelClient` trait the agent loop asks for its next action
//! - An OpenAI-compatible chat-completions client
//! - A scripted client that replays fixed decisions

pub mod openai;
pub mod scripted;
pub mod traits;

use std::sync::Arc;

use mcpilot_core::config::ModelConfig;
use mcpilot_core::error::ProviderError;

pub use openai::OpenAIClient;
pub use scripted::ScriptedModel;
pub use traits::{Decision, ModelClient};

/// Build the model client named by `config.provider`.
pub fn from_config(
    config: &ModelConfig,
    system_prompt: Option<&str>,
) -> Result<Arc<dyn ModelClient>, ProviderError> {
    match config.provider.as_str() {
        "openai" => {
            let mut client = OpenAIClient::from_config(config)?;
            if let Some(prompt) = system_prompt {
                client = client.with_system_prompt(prompt);
            }
            Ok(Arc::new(client))
        }
        other => Err(ProviderError::Unknown(other.to_string())),
    }
}
