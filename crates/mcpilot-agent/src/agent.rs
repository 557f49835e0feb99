//! Core agent implementation.
//!
//! The [`Agent`] drives a bounded state machine:
//!
//! ```text
//! Deciding --final answer--> Done
//!    ^  |
//!    |  +--tool call--> Calling --result turn--+
//!    +-----------------------------------------+
//! ```
//!
//! Every pass through `Deciding` counts as one iteration. Tool failures that
//! leave the session usable are recorded as error turns so the model can
//! adapt; a session that is gone aborts the run.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use mcpilot_core::config::AgentSettings;
use mcpilot_core::error::ProviderError;
use mcpilot_core::{Conversation, ToolDescriptor, ToolInvocation, Turn};
use mcpilot_mcp::{decode, CallToolResult, McpError, McpSession};
use mcpilot_providers::{Decision, ModelClient};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during agent operations.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The model client failed.
    #[error("Model error: {0}")]
    Model(#[from] anyhow::Error),

    /// The MCP session can no longer serve tool calls.
    #[error("Session error: {0}")]
    Session(McpError),

    /// The model did not produce a final answer in time.
    #[error("Iteration limit of {0} reached without a final answer")]
    IterationLimit(usize),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Agent not properly configured.
    #[error("Not configured: {0}")]
    NotConfigured(String),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

impl From<AgentError> for mcpilot_core::Error {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Session(e) => e.into(),
            AgentError::IterationLimit(n) => mcpilot_core::Error::IterationLimit(n),
            AgentError::NotConfigured(msg) => mcpilot_core::Error::Config(msg),
            AgentError::Model(e) => match e.downcast::<ProviderError>() {
                Ok(provider) => mcpilot_core::Error::Provider(provider),
                Err(e) => mcpilot_core::Error::Agent(format!("{:#}", e)),
            },
            AgentError::Cancelled => mcpilot_core::Error::Agent("cancelled".to_string()),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of model decisions per run.
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: AgentSettings::default().max_iterations,
        }
    }
}

impl From<&AgentSettings> for AgentConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Final response from the agent.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// The model's final answer.
    pub answer: String,
    /// Number of model decisions taken.
    pub iterations: usize,
    /// Every turn of the run, in order.
    pub conversation: Conversation,
}

// ============================================================================
// Seams
// ============================================================================

/// Something that can run tools on the agent's behalf.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Invoke `name` with `arguments`.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError>;
}

#[async_trait]
impl ToolSession for McpSession {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        McpSession::call_tool(self, name, arguments).await
    }
}

/// Handler for agent events during execution.
///
/// Implement this trait to receive callbacks during agent operation.
pub trait AgentEventHandler: Send + Sync {
    /// Called before each model decision.
    fn on_thinking(&self, _iteration: usize) {}

    /// Called when a tool invocation starts.
    fn on_tool_start(&self, _invocation: &ToolInvocation) {}

    /// Called with the decoded output of a tool invocation.
    fn on_tool_complete(&self, _invocation: &ToolInvocation, _output: &str, _is_error: bool) {}

    /// Called when the agent completes successfully.
    fn on_complete(&self, _response: &AgentResponse) {}

    /// Called when a run fails.
    fn on_error(&self, _error: &AgentError) {}
}

/// Default event handler that does nothing.
pub struct NoOpEventHandler;

impl AgentEventHandler for NoOpEventHandler {}

// ============================================================================
// Agent
// ============================================================================

enum LoopState {
    Deciding,
    Calling(ToolInvocation),
    Done(String),
}

/// The tool-calling agent.
pub struct Agent {
    /// Session that runs tools.
    session: Arc<dyn ToolSession>,
    /// Model that picks the next action.
    model: Arc<dyn ModelClient>,
    /// Tools offered to the model.
    tools: Vec<ToolDescriptor>,
    /// Agent configuration.
    config: AgentConfig,
    /// Event handler for UI callbacks.
    event_handler: Arc<dyn AgentEventHandler>,
    /// Cancellation token for stopping operations.
    cancel_token: CancellationToken,
}

impl Agent {
    /// Create a new agent with all dependencies.
    pub fn new(
        session: Arc<dyn ToolSession>,
        model: Arc<dyn ModelClient>,
        tools: Vec<ToolDescriptor>,
        config: AgentConfig,
        event_handler: Arc<dyn AgentEventHandler>,
    ) -> Self {
        Self {
            session,
            model,
            tools,
            config,
            event_handler,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Tools offered to the model.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Get the agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel any ongoing operation.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// A handle that cancels this agent from another task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Reset the cancellation token for a new operation.
    pub fn reset_cancel(&mut self) {
        self.cancel_token = CancellationToken::new();
    }

    // ========================================================================
    // Main Loop
    // ========================================================================

    /// Run `task` to a final answer.
    pub async fn run(&self, task: &str) -> AgentResult<AgentResponse> {
        info!(
            model = self.model.id(),
            tools = self.tools.len(),
            max_iterations = self.config.max_iterations,
            "Starting agent run"
        );

        match self.run_loop(task).await {
            Ok(response) => {
                info!(iterations = response.iterations, "Agent run complete");
                self.event_handler.on_complete(&response);
                Ok(response)
            }
            Err(e) => {
                warn!(error = %e, "Agent run failed");
                self.event_handler.on_error(&e);
                Err(e)
            }
        }
    }

    async fn run_loop(&self, task: &str) -> AgentResult<AgentResponse> {
        let mut conversation = Conversation::new();
        conversation.push(Turn::human(task));

        let mut iterations = 0;
        let mut invocations = 0;
        let mut state = LoopState::Deciding;

        loop {
            state = match state {
                LoopState::Deciding => {
                    if iterations >= self.config.max_iterations {
                        warn!(
                            max_iterations = self.config.max_iterations,
                            "Iteration limit reached"
                        );
                        return Err(AgentError::IterationLimit(self.config.max_iterations));
                    }
                    iterations += 1;

                    debug!(iteration = iterations, turns = conversation.len(), "Asking model");
                    self.event_handler.on_thinking(iterations);

                    let decision = self
                        .cancellable(self.model.decide(&conversation, &self.tools))
                        .await??;

                    match decision {
                        Decision::FinalAnswer { text } => LoopState::Done(text),
                        Decision::ToolCall { name, arguments } => {
                            invocations += 1;
                            LoopState::Calling(ToolInvocation::new(
                                format!("call_{}", invocations),
                                name,
                                arguments,
                            ))
                        }
                    }
                }
                LoopState::Calling(invocation) => {
                    self.event_handler.on_tool_start(&invocation);
                    let (output, is_error) = self.invoke(&invocation).await?;
                    self.event_handler
                        .on_tool_complete(&invocation, &output, is_error);

                    conversation.push(Turn::tool_result(invocation, output, is_error));
                    LoopState::Deciding
                }
                LoopState::Done(answer) => {
                    conversation.push(Turn::assistant(answer.clone()));
                    return Ok(AgentResponse {
                        answer,
                        iterations,
                        conversation,
                    });
                }
            };
        }
    }

    /// Run one invocation and describe its outcome for the model.
    async fn invoke(&self, invocation: &ToolInvocation) -> AgentResult<(String, bool)> {
        debug!(
            id = %invocation.id,
            tool = %invocation.name,
            "Invoking tool"
        );

        let result = self
            .cancellable(
                self.session
                    .call_tool(&invocation.name, invocation.arguments.clone()),
            )
            .await?;

        match result {
            Ok(result) => {
                let outcome = decode(&result);
                if outcome.is_error() {
                    debug!(tool = %invocation.name, "Tool reported failure");
                }
                Ok((outcome.text(), outcome.is_error()))
            }
            Err(e) if e.is_fatal() => Err(AgentError::Session(e)),
            Err(e) => {
                warn!(tool = %invocation.name, error = %e, "Tool call failed");
                Ok((e.to_string(), true))
            }
        }
    }

    /// Await `future` unless the agent is cancelled first.
    async fn cancellable<F: Future>(&self, future: F) -> AgentResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(AgentError::Cancelled),
            output = future => Ok(output),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for constructing an [`Agent`].
#[derive(Default)]
pub struct AgentBuilder {
    session: Option<Arc<dyn ToolSession>>,
    model: Option<Arc<dyn ModelClient>>,
    tools: Vec<ToolDescriptor>,
    config: AgentConfig,
    event_handler: Option<Arc<dyn AgentEventHandler>>,
}

impl AgentBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session that runs tools.
    pub fn session(mut self, session: Arc<dyn ToolSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Set the model client.
    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the tools offered to the model.
    pub fn tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the maximum number of iterations.
    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    /// Set the full configuration.
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn AgentEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the agent.
    ///
    /// Returns an error if required components are missing.
    pub fn build(self) -> AgentResult<Agent> {
        let session = self
            .session
            .ok_or_else(|| AgentError::NotConfigured("session is required".into()))?;
        let model = self
            .model
            .ok_or_else(|| AgentError::NotConfigured("model is required".into()))?;
        let event_handler = self
            .event_handler
            .unwrap_or_else(|| Arc::new(NoOpEventHandler));

        Ok(Agent::new(
            session,
            model,
            self.tools,
            self.config,
            event_handler,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
