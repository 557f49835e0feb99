//! # mcpilot-agent
//!
//! Tool-calling agent loop for Mcpilot.
//!
//! The agent asks a model for the next action, runs requested tools through
//! an MCP session, and feeds decoded results back until the model answers or
//! the iteration limit is reached.

pub mod agent;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentError, AgentEventHandler, AgentResponse, AgentResult,
    NoOpEventHandler, ToolSession,
};
