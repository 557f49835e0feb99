//! OpenAI-compatible chat-completions client.
//!
//! Tools are offered as functions. Each tool-result turn is replayed as the
//! assistant message that requested the call followed by the `tool` message
//! carrying its output, so the API sees a well-formed exchange.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use mcpilot_core::config::ModelConfig;
use mcpilot_core::error::ProviderError;
use mcpilot_core::{Conversation, ToolDescriptor, TurnContent};

use crate::traits::{Decision, ModelClient};

/// Default OpenAI API base URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

const PROVIDER: &str = "openai";

/// OpenAI client for chat models with function calling.
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIClient {
    /// Create a new client with default settings.
    pub fn new(api_key: impl Into<String>) -> Self {
        let defaults = ModelConfig::default();
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: defaults.model,
            system_prompt: None,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        }
    }

    /// Create from the `[model]` configuration section.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: PROVIDER.to_string(),
                env_var: config.api_key_env.clone(),
            })?;

        let mut client = Self::new(api_key).with_model(&config.model);
        if let Some(url) = &config.base_url {
            client = client.with_base_url(url);
        }
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    /// Set a custom base URL (for OpenRouter, Azure, local servers, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a system prompt sent before the conversation.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn build_request(&self, conversation: &Conversation, tools: &[ToolDescriptor]) -> ChatRequest {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::text("system", system));
        }
        messages.extend(format_messages(conversation));

        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            tools: if tools.is_empty() {
                None
            } else {
                Some(format_tools(tools))
            },
        }
    }
}

#[async_trait]
impl ModelClient for OpenAIClient {
    fn id(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip(self, conversation, tools), fields(model = %self.model))]
    async fn decide(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
    ) -> anyhow::Result<Decision> {
        let request = self.build_request(conversation, tools);

        debug!(
            messages = request.messages.len(),
            tools = tools.len(),
            "Sending request to OpenAI API"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenAI API error: {} - {}", status, error_text);
            return Err(ProviderError::api_error(PROVIDER, status.as_u16(), error_text).into());
        }

        let api_response: ChatResponse = response.json().await?;
        Ok(parse_response(api_response)?)
    }
}

/// Convert conversation turns to chat messages.
fn format_messages(conversation: &Conversation) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(conversation.len());
    for turn in conversation.turns() {
        match &turn.content {
            TurnContent::Text { text } => {
                let role = match turn.role {
                    mcpilot_core::Role::Assistant => "assistant",
                    _ => "user",
                };
                messages.push(ChatMessage::text(role, text));
            }
            TurnContent::ToolResult {
                invocation,
                output,
                is_error,
            } => {
                messages.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![ChatToolCall {
                        id: invocation.id.clone(),
                        tool_type: "function".to_string(),
                        function: ChatFunctionCall {
                            name: invocation.name.clone(),
                            arguments: invocation.arguments.to_string(),
                        },
                    }]),
                    tool_call_id: None,
                });
                let content = if *is_error {
                    format!("Tool error: {}", output)
                } else {
                    output.clone()
                };
                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: Some(invocation.id.clone()),
                });
            }
        }
    }
    messages
}

/// Convert tool descriptors to function definitions.
fn format_tools(tools: &[ToolDescriptor]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|t| ChatTool {
            tool_type: "function".to_string(),
            function: ChatFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Turn the first choice into a decision.
fn parse_response(response: ChatResponse) -> Result<Decision, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse {
            provider: PROVIDER.to_string(),
            message: "response has no choices".to_string(),
        })?;

    let mut tool_calls = choice.message.tool_calls.unwrap_or_default();
    if !tool_calls.is_empty() {
        if tool_calls.len() > 1 {
            warn!(
                count = tool_calls.len(),
                "Model requested several tool calls, using the first"
            );
        }
        let call = tool_calls.swap_remove(0);
        let raw = call.function.arguments.trim();
        let raw = if raw.is_empty() { "{}" } else { raw };
        let arguments = serde_json::from_str(raw).map_err(|e| {
            warn!(tool = %call.function.name, error = %e, "Tool arguments are not valid JSON");
            ProviderError::MalformedResponse {
                provider: PROVIDER.to_string(),
                message: format!(
                    "arguments for tool '{}' are not valid JSON: {}",
                    call.function.name, e
                ),
            }
        })?;
        return Ok(Decision::tool_call(call.function.name, arguments));
    }

    let text = choice.message.content.unwrap_or_default();
    if choice.finish_reason.as_deref() == Some("length") {
        warn!("Model response was truncated at max_tokens");
    }
    Ok(Decision::final_answer(text))
}

// API types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    tool_type: String,
    function: ChatFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpilot_core::{ToolInvocation, Turn};
    use serde_json::json;

    fn fetchkit_tool() -> ToolDescriptor {
        ToolDescriptor::new("fetchkit", "Fetch a URL").with_input_schema(json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"]
        }))
    }

    #[test]
    fn test_client_metadata() {
        let client = OpenAIClient::new("test-key")
            .with_base_url("https://openrouter.ai/api/v1/")
            .with_model("gpt-4o");
        assert_eq!(client.id(), "openai");
        assert_eq!(client.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(client.model, "gpt-4o");
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = ModelConfig {
            api_key: None,
            api_key_env: Some("MCPILOT_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..ModelConfig::default()
        };
        let err = OpenAIClient::from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured { .. }));

        let config = ModelConfig {
            api_key: Some("sk-test".to_string()),
            base_url: Some("http://localhost:11434/v1".to_string()),
            temperature: 0.3,
            ..ModelConfig::default()
        };
        let client = OpenAIClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");
        assert_eq!(client.temperature, 0.3);
    }

    #[test]
    fn test_request_layout() {
        let client = OpenAIClient::new("test-key").with_system_prompt("Use tools when needed.");

        let invocation = ToolInvocation::new("call_1", "fetchkit", json!({"url": "https://example.com"}));
        let mut conversation = Conversation::new();
        conversation.push(Turn::human("Summarize example.com"));
        conversation.push(Turn::tool_result(invocation, "{\"content\":\"hi\"}", false));

        let request = client.build_request(&conversation, &[fetchkit_tool()]);
        let value = serde_json::to_value(&request).unwrap();

        let messages = value["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);

        assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(messages[2]["tool_calls"][0]["function"]["name"], "fetchkit");
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["arguments"],
            "{\"url\":\"https://example.com\"}"
        );
        assert!(messages[2].get("content").is_none());
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(messages[3]["content"], "{\"content\":\"hi\"}");

        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "fetchkit");
        assert_eq!(value["tools"][0]["function"]["parameters"]["required"][0], "url");
    }

    #[test]
    fn test_failed_tool_output_is_marked() {
        let invocation = ToolInvocation::new("call_1", "fetchkit", json!({"url": "https://slow.example.com"}));
        let mut conversation = Conversation::new();
        conversation.push(Turn::human("Fetch the slow site"));
        conversation.push(Turn::tool_result(invocation, "timeout", true));

        let messages = format_messages(&conversation);
        assert_eq!(messages[2].content.as_deref(), Some("Tool error: timeout"));
    }

    #[test]
    fn test_no_tools_omits_field() {
        let client = OpenAIClient::new("test-key");
        let mut conversation = Conversation::new();
        conversation.push(Turn::human("hello"));

        let value = serde_json::to_value(client.build_request(&conversation, &[])).unwrap();
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_parse_tool_call() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "fetchkit",
                            "arguments": "{\"url\":\"https://example.com\",\"as_markdown\":true}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

        assert_eq!(
            parse_response(response).unwrap(),
            Decision::tool_call(
                "fetchkit",
                json!({"url": "https://example.com", "as_markdown": true})
            )
        );
    }

    #[test]
    fn test_parse_invalid_tool_arguments() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "fetchkit", "arguments": "{\"url\": "}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

        match parse_response(response).unwrap_err() {
            ProviderError::MalformedResponse { provider, message } => {
                assert_eq!(provider, "openai");
                assert!(message.contains("fetchkit"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_tool_arguments() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "list_pages", "arguments": ""}
                    }]
                }
            }]
        }))
        .unwrap();

        assert_eq!(
            parse_response(response).unwrap(),
            Decision::tool_call("list_pages", json!({}))
        );
    }

    #[test]
    fn test_parse_final_answer() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Example Domain is a placeholder."},
                "finish_reason": "stop"
            }]
        }))
        .unwrap();

        assert_eq!(
            parse_response(response).unwrap(),
            Decision::final_answer("Example Domain is a placeholder.")
        );
    }

    #[test]
    fn test_parse_empty_choices() {
        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            parse_response(response),
            Err(ProviderError::MalformedResponse { .. })
        ));
    }
}
